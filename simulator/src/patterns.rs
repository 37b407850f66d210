//! Payload distribution patterns.
//!
//! A task declares a total size (possibly a formula) and a pattern; the
//! pattern expands the total into a per-rank vector or a rank×rank payload
//! matrix when the job is scaled to a concrete node count.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorPattern {
    AllRanks,
    RootOnly,
    EvenRanks,
    OddRanks,
    Uniform,
    Vector,
}

impl VectorPattern {
    /// Parses the workload-file spelling, case-insensitively; `total` is an
    /// accepted alias for `all_ranks`.
    pub fn parse(pattern: &str) -> VectorPattern {
        match pattern.to_lowercase().as_str() {
            "all_ranks" | "total" => VectorPattern::AllRanks,
            "root_only" => VectorPattern::RootOnly,
            "even_ranks" => VectorPattern::EvenRanks,
            "odd_ranks" => VectorPattern::OddRanks,
            "uniform" => VectorPattern::Uniform,
            "vector" => VectorPattern::Vector,
            other => panic!("Unknown vector pattern type {}", other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatrixPattern {
    AllToAll,
    Gather,
    Scatter,
    MasterWorker,
    Ring,
    RingClockwise,
    RingCounterClockwise,
    Matrix,
}

impl MatrixPattern {
    pub fn parse(pattern: &str) -> MatrixPattern {
        match pattern.to_lowercase().as_str() {
            "all_to_all" => MatrixPattern::AllToAll,
            "gather" => MatrixPattern::Gather,
            "scatter" => MatrixPattern::Scatter,
            "master_worker" => MatrixPattern::MasterWorker,
            "ring" => MatrixPattern::Ring,
            "ring_clockwise" => MatrixPattern::RingClockwise,
            "ring_counter_clockwise" => MatrixPattern::RingCounterClockwise,
            "matrix" => MatrixPattern::Matrix,
            other => panic!("Unknown matrix pattern type {}", other),
        }
    }
}

fn euclidean_mod(a: i64, b: i64) -> usize {
    (((a % b) + b) % b) as usize
}

/// Expands a total size into per-rank sizes.
pub fn create_vector(size: f64, pattern: VectorPattern, num_nodes: usize) -> Vec<f64> {
    let mut sizes = vec![0.0; num_nodes];
    match pattern {
        VectorPattern::Uniform => sizes.fill(size),
        VectorPattern::AllRanks => sizes.fill(size / num_nodes as f64),
        VectorPattern::RootOnly => sizes[0] = size,
        VectorPattern::EvenRanks => {
            let participating = num_nodes / 2 + num_nodes % 2;
            let per_node = size / participating as f64;
            for i in (0..num_nodes).step_by(2) {
                sizes[i] = per_node;
            }
        }
        VectorPattern::OddRanks => {
            let participating = num_nodes / 2;
            let per_node = size / participating as f64;
            for i in (1..num_nodes).step_by(2) {
                sizes[i] = per_node;
            }
        }
        VectorPattern::Vector => panic!("VECTOR pattern carries literal sizes and cannot be expanded"),
    }
    sizes
}

/// Expands a total size into a sender×receiver payload matrix
/// (row-major, `sizes[i * n + j]` = bytes from rank i to rank j).
pub fn create_matrix(size: f64, pattern: MatrixPattern, num_nodes: usize) -> Vec<f64> {
    if num_nodes == 1 {
        return vec![0.0];
    }
    let n = num_nodes;
    let mut sizes = vec![0.0; n * n];
    match pattern {
        MatrixPattern::AllToAll => {
            let payload = size / (n * n - n) as f64;
            for i in 0..n {
                for j in 0..n {
                    if i != j {
                        sizes[i * n + j] = payload;
                    }
                }
            }
        }
        MatrixPattern::Gather => {
            let payload = size / n as f64;
            for i in 1..n {
                sizes[i * n] = payload;
            }
        }
        MatrixPattern::Scatter => {
            let payload = size / n as f64;
            for j in 1..n {
                sizes[j] = payload;
            }
        }
        MatrixPattern::Ring => {
            let payload = size / (n * 2) as f64;
            for i in 0..n {
                sizes[i * n + euclidean_mod(i as i64 - 1, n as i64)] += payload;
                sizes[i * n + euclidean_mod(i as i64 + 1, n as i64)] += payload;
            }
        }
        MatrixPattern::RingClockwise => {
            let payload = size / n as f64;
            for i in 0..n {
                sizes[i * n + euclidean_mod(i as i64 + 1, n as i64)] += payload;
            }
        }
        MatrixPattern::RingCounterClockwise => {
            let payload = size / n as f64;
            for i in 0..n {
                sizes[i * n + euclidean_mod(i as i64 - 1, n as i64)] += payload;
            }
        }
        MatrixPattern::MasterWorker => {
            let payload = size / ((n - 1) as f64 / 2.0);
            for i in 1..n {
                sizes[i] = payload;
                sizes[i * n] = payload;
            }
        }
        MatrixPattern::Matrix => panic!("MATRIX pattern carries literal payloads and cannot be expanded"),
    }
    sizes
}

/// Splits a total GPU communication size into an intra-node (GPU×GPU) and an
/// inter-node (node×node) matrix. Only the symmetric patterns make sense for
/// the two-level decomposition.
pub fn create_matrices(
    size: f64,
    pattern: MatrixPattern,
    num_nodes: usize,
    num_gpus_per_node: usize,
) -> (Vec<f64>, Vec<f64>) {
    let num_gpus = num_nodes * num_gpus_per_node;
    let (intra_size, inter_size) = if num_gpus_per_node == 1 {
        (0.0, size)
    } else {
        match pattern {
            MatrixPattern::AllToAll => {
                let per_com = size / (num_gpus * num_gpus - num_gpus) as f64;
                let peers = (num_gpus_per_node - 1) as f64;
                (
                    per_com * peers * peers,
                    per_com * (num_nodes * num_gpus_per_node - num_gpus_per_node) as f64,
                )
            }
            MatrixPattern::Ring => {
                let per_com = size / (num_gpus * 2) as f64;
                let intra = if num_nodes == 1 {
                    per_com * num_gpus_per_node as f64 * 2.0
                } else {
                    per_com * (num_gpus_per_node - 1) as f64 * 2.0
                };
                (intra, per_com * num_nodes as f64 * 2.0)
            }
            MatrixPattern::RingClockwise | MatrixPattern::RingCounterClockwise => {
                let per_com = size / num_gpus as f64;
                let intra = if num_nodes == 1 {
                    per_com * num_gpus_per_node as f64
                } else {
                    per_com * (num_gpus_per_node - 1) as f64
                };
                (intra, per_com * num_nodes as f64 * 2.0)
            }
            _ => panic!("Unsupported GPU communication pattern {:?}", pattern),
        }
    };
    (
        create_matrix(intra_size, pattern, num_gpus_per_node),
        create_matrix(inter_size, pattern, num_nodes),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total(v: &[f64]) -> f64 {
        v.iter().sum()
    }

    #[test]
    fn vector_patterns() {
        assert_eq!(create_vector(12.0, VectorPattern::Uniform, 3), vec![12.0; 3]);
        assert_eq!(create_vector(12.0, VectorPattern::AllRanks, 3), vec![4.0; 3]);
        assert_eq!(
            create_vector(12.0, VectorPattern::RootOnly, 3),
            vec![12.0, 0.0, 0.0]
        );
        assert_eq!(
            create_vector(12.0, VectorPattern::EvenRanks, 4),
            vec![6.0, 0.0, 6.0, 0.0]
        );
        assert_eq!(
            create_vector(12.0, VectorPattern::EvenRanks, 5),
            vec![4.0, 0.0, 4.0, 0.0, 4.0]
        );
        assert_eq!(
            create_vector(12.0, VectorPattern::OddRanks, 5),
            vec![0.0, 6.0, 0.0, 6.0, 0.0]
        );
    }

    #[test]
    fn all_to_all_fills_off_diagonal() {
        let m = create_matrix(24.0, MatrixPattern::AllToAll, 3);
        // 6 off-diagonal cells, 4 bytes each
        assert_eq!(m[0 * 3 + 0], 0.0);
        assert_eq!(m[0 * 3 + 1], 4.0);
        assert_eq!(m[2 * 3 + 1], 4.0);
        assert_eq!(total(&m), 24.0);
    }

    #[test]
    fn gather_and_scatter() {
        let g = create_matrix(12.0, MatrixPattern::Gather, 4);
        for i in 1..4 {
            assert_eq!(g[i * 4], 3.0);
        }
        assert_eq!(g[0], 0.0);
        let s = create_matrix(12.0, MatrixPattern::Scatter, 4);
        for j in 1..4 {
            assert_eq!(s[j], 3.0);
        }
    }

    #[test]
    fn rings() {
        let cw = create_matrix(12.0, MatrixPattern::RingClockwise, 4);
        assert_eq!(cw[0 * 4 + 1], 3.0);
        assert_eq!(cw[3 * 4 + 0], 3.0);
        assert_eq!(cw[0 * 4 + 3], 0.0);
        let ccw = create_matrix(12.0, MatrixPattern::RingCounterClockwise, 4);
        assert_eq!(ccw[0 * 4 + 3], 3.0);
        let both = create_matrix(12.0, MatrixPattern::Ring, 4);
        // half of total/n in each direction
        assert_eq!(both[0 * 4 + 1], 1.5);
        assert_eq!(both[0 * 4 + 3], 1.5);
    }

    #[test]
    fn ring_of_two_accumulates_both_directions() {
        let m = create_matrix(8.0, MatrixPattern::Ring, 2);
        // neighbours coincide, payloads accumulate in one cell per sender
        assert_eq!(m, vec![0.0, 4.0, 4.0, 0.0]);
    }

    #[test]
    fn master_worker_is_bidirectional() {
        let m = create_matrix(12.0, MatrixPattern::MasterWorker, 3);
        let payload = 12.0 / 1.0; // (n-1)/2 = 1
        assert_eq!(m[0 * 3 + 1], payload);
        assert_eq!(m[1 * 3 + 0], payload);
        assert_eq!(m[1 * 3 + 2], 0.0);
    }

    #[test]
    fn single_node_matrix_is_empty() {
        assert_eq!(create_matrix(100.0, MatrixPattern::AllToAll, 1), vec![0.0]);
    }

    #[test]
    fn gpu_matrices_single_gpu_is_all_inter() {
        let (intra, inter) = create_matrices(24.0, MatrixPattern::AllToAll, 3, 1);
        assert_eq!(intra, vec![0.0]);
        assert_eq!(total(&inter), 24.0);
    }

    #[test]
    fn gpu_matrices_all_to_all_splits_levels() {
        let (intra, inter) = create_matrices(120.0, MatrixPattern::AllToAll, 2, 2);
        // 4 GPUs, 12 directed pairs, 10 bytes each; one intra peer per GPU
        assert_eq!(total(&intra), 10.0);
        assert_eq!(total(&inter), 20.0);
    }
}
