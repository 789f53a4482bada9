//! Dims mappings and the rule that reconciles them.

use super::ProcessMesh;

/// One entry per tensor axis: `-1` if the axis is replicated, otherwise the mesh dimension the
/// axis is split over.
pub type DimsMapping = Vec<i64>;

/// The single mapping a set of candidate entries agree on.
///
/// `-1` yields to any other entry; equal entries agree. Two different sharded entries conflict
/// and produce `None`, as does an empty candidate list.
///
/// ```rust
/// use shardwise::distributed::auto_parallel::compute_compatible_dim_mapping;
///
/// assert_eq!(compute_compatible_dim_mapping(&[-1, 0, -1]), Some(0));
/// assert_eq!(compute_compatible_dim_mapping(&[-1, -1]), Some(-1));
/// assert_eq!(compute_compatible_dim_mapping(&[0, 1]), None);
/// ```
pub fn compute_compatible_dim_mapping(dim_mappings: &[i64]) -> Option<i64> {
    let (&first, rest) = dim_mappings.split_first()?;
    let mut compatible = first;
    for &mapping in rest {
        if compatible == -1 {
            compatible = mapping;
        } else if mapping != -1 && mapping != compatible {
            return None;
        }
    }
    Some(compatible)
}

/// Reconciles entry `index_list[i]` of `dims_mapping_list[i]` across all `i`.
///
/// When the entries are compatible every entry that differs from the agreed value is overwritten
/// and `true` is returned. Conflicting entries are left untouched and `false` is returned.
///
/// # Panics
///
/// Panics if the two lists differ in length or an index is out of range for its mapping.
pub fn compute_compatible_and_update_dim_mapping(
    dims_mapping_list: &mut [&mut [i64]],
    index_list: &[usize],
) -> bool {
    assert_eq!(
        dims_mapping_list.len(),
        index_list.len(),
        "every dims mapping needs exactly one index"
    );

    let candidates: Vec<i64> = dims_mapping_list
        .iter()
        .zip(index_list)
        .map(|(mapping, &index)| {
            assert!(
                index < mapping.len(),
                "index {} out of range for dims mapping {:?}",
                index,
                mapping
            );
            mapping[index]
        })
        .collect();

    let Some(compatible) = compute_compatible_dim_mapping(&candidates) else {
        return false;
    };

    let mut changed = false;
    for (mapping, &index) in dims_mapping_list.iter_mut().zip(index_list) {
        if mapping[index] != compatible {
            mapping[index] = compatible;
            changed = true;
        }
    }
    changed
}

/// Shape of the shard a single process holds.
///
/// An axis of global size `g` split over a mesh dimension of size `k` keeps `ceil(g / k)`
/// elements; unknown (`-1`) and replicated axes keep their global size.
pub fn local_shape(global_shape: &[i64], dims_mapping: &[i64], mesh: &ProcessMesh) -> Vec<i64> {
    global_shape
        .iter()
        .zip(dims_mapping.iter().copied().chain(std::iter::repeat(-1)))
        .map(|(&size, mapping)| {
            let parts = usize::try_from(mapping)
                .ok()
                .and_then(|axis| mesh.dim_size(axis))
                .unwrap_or(1) as i64;
            if size < 0 || parts <= 1 {
                size
            } else {
                (size + parts - 1) / parts
            }
        })
        .collect()
}

/// Whether `dims_mapping` splits `axis` over a mesh dimension with more than one process.
pub fn is_dim_shard(dims_mapping: &[i64], axis: usize, mesh: &ProcessMesh) -> bool {
    dims_mapping
        .get(axis)
        .and_then(|&m| usize::try_from(m).ok())
        .and_then(|mesh_axis| mesh.dim_size(mesh_axis))
        .is_some_and(|size| size > 1)
}
