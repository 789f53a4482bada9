use shardwise::distributed::auto_parallel::{
    Attribute, Block, Cluster, DataType, DistributedContext, DistributedOperator, OpDesc, OpRole,
    OperatorDistAttr, ProcessMesh, VarDesc, get_distributed_operator_impl_container,
};

fn names(vars: &[&str]) -> Vec<String> {
    vars.iter().map(|v| v.to_string()).collect()
}

/// A `transpose2_grad` with two data-parallel parameters (`w1`, `w2`), one replicated
/// parameter (`w3`) and an activation (`act`).
fn grad_setup(mesh: ProcessMesh) -> (DistributedOperator, DistributedContext) {
    let mut block = Block::new();
    block.add_var(VarDesc::parameter("w1", vec![8, 4], DataType::Float32));
    block.add_var(VarDesc::parameter("w2", vec![16, 4], DataType::Float32));
    block.add_var(VarDesc::parameter("w3", vec![4, 4], DataType::Float32));
    block.add_var(VarDesc::new("act", vec![-1, 4], DataType::Float32));
    block.add_var(VarDesc::new("out@GRAD", vec![4, 8], DataType::Float32));
    block.add_var(VarDesc::new("x@GRAD", vec![8, 4], DataType::Float32));

    let op = OpDesc::new("transpose2_grad")
        .with_input("W1", names(&["w1.cast_fp16"]))
        .with_input("Act", names(&["act"]))
        .with_input("W2", names(&["w2"]))
        .with_input("W3", names(&["w3"]))
        .with_input("Out@GRAD", names(&["out@GRAD"]))
        .with_output("X@GRAD", names(&["x@GRAD"]))
        .with_attr("axis", Attribute::Ints(vec![1, 0]))
        .with_attr(OpRole::ATTR_NAME, OpRole::Backward.as_attr());

    let mut attr = OperatorDistAttr::new(mesh);
    attr.set_input_dims_mapping("w1.cast_fp16", vec![0, -1]);
    attr.set_input_dims_mapping("act", vec![0, -1]);
    attr.set_input_dims_mapping("w2", vec![0, -1]);
    attr.set_input_dims_mapping("w3", vec![-1, -1]);
    attr.set_input_dims_mapping("out@GRAD", vec![-1, 0]);
    attr.set_output_dims_mapping("x@GRAD", vec![0, -1]);
    attr.set_output_dims_mapping("w1.cast_fp16@GRAD", vec![0, -1]);

    let mut serial = block;
    // The cast copy of w1 resolves to w1 for parameter checks but needs its own desc for costing.
    serial.add_var(VarDesc::new("w1.cast_fp16", vec![8, 4], DataType::Float16));
    (
        DistributedOperator::new(op, attr),
        DistributedContext::new(serial, 0),
    )
}

#[test]
fn test_backward_cost_has_one_entry_per_synced_parameter() {
    let mesh = ProcessMesh::new(vec![2, 2], vec![0, 1, 2, 3]).unwrap();
    let (dist_op, ctx) = grad_setup(mesh);
    let dist_impl = get_distributed_operator_impl_container("transpose2")
        .unwrap()
        .get_impl(0)
        .unwrap()
        .clone();

    let cost = dist_impl
        .calc_cost(OpRole::Backward, &dist_op, &ctx, &Cluster::default())
        .unwrap();
    // transpose2_grad + w1 + w2
    assert_eq!(cost.len(), 3);
    for mapping in &cost {
        assert_eq!(mapping.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }
    // The fp16 cast of w1 moves half the bytes of w2's shard and w2 is twice as tall.
    assert!(cost[1][&0].time < cost[2][&0].time);
    assert_eq!(cost[1][&0].flops, 16);
    assert_eq!(cost[2][&0].flops, 32);

    let forward = dist_impl
        .calc_cost(OpRole::Forward, &dist_op, &ctx, &Cluster::default())
        .unwrap();
    assert_eq!(forward.len(), 1);
}

#[test]
fn test_backward_cost_without_data_parallel_axis() {
    // Mesh axis 0 has a single process: nothing to synchronise.
    let mesh = ProcessMesh::new(vec![1, 4], vec![0, 1, 2, 3]).unwrap();
    let (dist_op, ctx) = grad_setup(mesh);
    let dist_impl = get_distributed_operator_impl_container("transpose2")
        .unwrap()
        .get_impl(0)
        .unwrap()
        .clone();
    let cost = dist_impl
        .calc_cost(OpRole::Backward, &dist_op, &ctx, &Cluster::default())
        .unwrap();
    assert_eq!(cost.len(), 1);
}

#[test]
fn test_backward_lowering_matches_cost_entries() {
    let mesh = ProcessMesh::new(vec![2, 2], vec![0, 1, 2, 3]).unwrap();
    let (dist_op, mut ctx) = grad_setup(mesh);
    let dist_impl = get_distributed_operator_impl_container("transpose2")
        .unwrap()
        .get_impl(0)
        .unwrap()
        .clone();

    let cost = dist_impl
        .calc_cost(OpRole::Backward, &dist_op, &ctx, &Cluster::default())
        .unwrap();
    dist_impl.backward(&mut ctx, &dist_op).unwrap();

    let allreduces: Vec<&OpDesc> = ctx
        .dist_block()
        .ops()
        .iter()
        .filter(|op| op.op_type() == "c_allreduce_sum")
        .collect();
    assert_eq!(allreduces.len(), cost.len() - 1);
    assert_eq!(
        allreduces[0].input("X"),
        Some(&["w1.cast_fp16@GRAD".to_string()][..])
    );
    // Process 0 sits at [0, 0]; its group along mesh axis 0 is column 0.
    assert_eq!(
        allreduces[0].attr("ring_ranks"),
        Some(&Attribute::Ints(vec![0, 2]))
    );
    assert_eq!(ctx.dist_ops().count(), 5);
}

#[test]
fn test_cluster_drives_cost() {
    let mesh = ProcessMesh::new(vec![2, 2], vec![0, 1, 2, 3]).unwrap();
    let (dist_op, ctx) = grad_setup(mesh);
    let dist_impl = get_distributed_operator_impl_container("transpose2")
        .unwrap()
        .get_impl(0)
        .unwrap()
        .clone();

    let fast = Cluster::default();
    let slow = Cluster::from_json_str(r#"{ "link_bandwidth_gbps": 1.0, "link_latency_us": 50.0 }"#)
        .unwrap();
    let fast_cost = dist_impl
        .calc_cost(OpRole::Backward, &dist_op, &ctx, &fast)
        .unwrap();
    let slow_cost = dist_impl
        .calc_cost(OpRole::Backward, &dist_op, &ctx, &slow)
        .unwrap();

    // Computation is unaffected by the link; communication is not.
    assert_eq!(fast_cost[0], slow_cost[0]);
    assert!(slow_cost[1][&0].time > fast_cost[1][&0].time + 50.0);
}
