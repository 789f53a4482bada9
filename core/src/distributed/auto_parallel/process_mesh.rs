use super::{DistError, Result};

/// A logical N-D arrangement of processes.
///
/// `processes[i]` sits at the row-major coordinate `i` of `topology`:
///
/// ```text
/// topology  [2, 3]
/// processes [0, 1, 2, 3, 4, 5]
///
///            axis 1
///          0   1   2
/// axis 0 [ 0,  1,  2 ]
///        [ 3,  4,  5 ]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessMesh {
    topology: Vec<usize>,
    processes: Vec<usize>,
}

impl ProcessMesh {
    /// # Errors
    ///
    /// Returns `DistError::InvalidMesh` if the topology is empty, has a zero-sized dimension, does
    /// not hold exactly `processes.len()` slots, or if a process id repeats.
    pub fn new(topology: Vec<usize>, processes: Vec<usize>) -> Result<Self> {
        if topology.is_empty() || topology.contains(&0) {
            return Err(DistError::InvalidMesh(format!(
                "topology {:?} must be non-empty with positive dimensions",
                topology
            )));
        }
        let slots: usize = topology.iter().product();
        if slots != processes.len() {
            return Err(DistError::InvalidMesh(format!(
                "topology {:?} has {} slots but {} processes were given",
                topology,
                slots,
                processes.len()
            )));
        }
        let mut sorted = processes.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != processes.len() {
            return Err(DistError::InvalidMesh(format!(
                "processes {:?} contain duplicates",
                processes
            )));
        }
        Ok(Self {
            topology,
            processes,
        })
    }

    /// A 1-D mesh over processes `0..n`.
    pub fn linear(n: usize) -> Result<Self> {
        Self::new(vec![n], (0..n).collect())
    }

    pub fn topology(&self) -> &[usize] {
        &self.topology
    }

    pub fn processes(&self) -> &[usize] {
        &self.processes
    }

    pub fn ndim(&self) -> usize {
        self.topology.len()
    }

    /// Size of mesh dimension `axis`, or `None` if the mesh has no such dimension.
    pub fn dim_size(&self, axis: usize) -> Option<usize> {
        self.topology.get(axis).copied()
    }

    /// Coordinate of `process` in the mesh.
    pub fn coordinate(&self, process: usize) -> Option<Vec<usize>> {
        let mut rem = self.processes.iter().position(|&p| p == process)?;
        let mut coord = vec![0; self.topology.len()];
        for (d, &size) in self.topology.iter().enumerate().rev() {
            coord[d] = rem % size;
            rem /= size;
        }
        Some(coord)
    }

    fn process_at(&self, coord: &[usize]) -> usize {
        let index = coord
            .iter()
            .zip(&self.topology)
            .fold(0, |acc, (&c, &size)| acc * size + c);
        self.processes[index]
    }

    /// The processes sharing `process`'s coordinate on every mesh axis except `axis`, ordered by
    /// their coordinate along `axis`.
    ///
    /// This is the communication group of a collective along `axis`.
    pub fn group_along(&self, process: usize, axis: usize) -> Option<Vec<usize>> {
        let size = self.dim_size(axis)?;
        let mut coord = self.coordinate(process)?;
        Some(
            (0..size)
                .map(|c| {
                    coord[axis] = c;
                    self.process_at(&coord)
                })
                .collect(),
        )
    }

    /// Every distinct communication group along `axis`, in mesh order.
    pub fn groups_along(&self, axis: usize) -> Vec<Vec<usize>> {
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for &process in &self.processes {
            if groups.iter().any(|g| g.contains(&process)) {
                continue;
            }
            if let Some(group) = self.group_along(process, axis) {
                groups.push(group);
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh_2x3() -> ProcessMesh {
        ProcessMesh::new(vec![2, 3], vec![0, 1, 2, 3, 4, 5]).unwrap()
    }

    #[test]
    fn test_invalid_mesh() {
        assert!(matches!(
            ProcessMesh::new(vec![2, 2], vec![0, 1, 2]),
            Err(DistError::InvalidMesh(_))
        ));
        assert!(ProcessMesh::new(vec![], vec![]).is_err());
        assert!(ProcessMesh::new(vec![2, 0], vec![]).is_err());
        assert!(ProcessMesh::new(vec![2], vec![1, 1]).is_err());
    }

    #[test]
    fn test_coordinate() {
        let mesh = mesh_2x3();
        assert_eq!(mesh.coordinate(0), Some(vec![0, 0]));
        assert_eq!(mesh.coordinate(4), Some(vec![1, 1]));
        assert_eq!(mesh.coordinate(5), Some(vec![1, 2]));
        assert_eq!(mesh.coordinate(6), None);
    }

    #[test]
    fn test_group_along() {
        let mesh = mesh_2x3();
        assert_eq!(mesh.group_along(4, 0), Some(vec![1, 4]));
        assert_eq!(mesh.group_along(4, 1), Some(vec![3, 4, 5]));
        assert_eq!(mesh.group_along(4, 2), None);
    }

    #[test]
    fn test_groups_along() {
        let mesh = mesh_2x3();
        assert_eq!(mesh.groups_along(0), vec![vec![0, 3], vec![1, 4], vec![2, 5]]);
        assert_eq!(mesh.groups_along(1), vec![vec![0, 1, 2], vec![3, 4, 5]]);
    }

    #[test]
    fn test_non_contiguous_process_ids() {
        let mesh = ProcessMesh::new(vec![2], vec![4, 6]).unwrap();
        assert_eq!(mesh.group_along(6, 0), Some(vec![4, 6]));
        assert_eq!(mesh.dim_size(0), Some(2));
    }
}
