use approx::assert_relative_eq;
use cellwise::coefficient::{CoefficientFunction, Constant, InverseQuadratic};
use cellwise::device::Device;
use cellwise::operator::LaplaceOperator;
use cellwise::paradis::DisjointBlocks;
use cellwise::procedural::unit_box_topology;
use cellwise::quadrature::gauss_interval;
use cellwise::topology::CellTopology;
use cellwise::vector::DeviceVector;
use cellwise::Error;
use nalgebra::{DMatrix, DVector, SVector};
use proptest::collection::vec;
use proptest::prelude::*;
use std::sync::Arc;

fn device() -> Arc<Device> {
    Device::with_threads(4).unwrap()
}

fn multi_index<const D: usize>(mut linear: usize, extent: usize) -> [usize; D] {
    let mut indices = [0; D];
    for index in indices.iter_mut() {
        *index = linear % extent;
        linear /= extent;
    }
    indices
}

fn lagrange_value(nodes: &[f64], i: usize, x: f64) -> f64 {
    nodes
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != i)
        .map(|(_, &xj)| (x - xj) / (nodes[i] - xj))
        .product()
}

fn lagrange_derivative(nodes: &[f64], i: usize, x: f64) -> f64 {
    let mut sum = 0.0;
    for (k, &xk) in nodes.iter().enumerate() {
        if k == i {
            continue;
        }
        let mut term = 1.0 / (nodes[i] - xk);
        for (j, &xj) in nodes.iter().enumerate() {
            if j != i && j != k {
                term *= (x - xj) / (nodes[i] - xj);
            }
        }
        sum += term;
    }
    sum
}

/// Assemble the operator matrix entry by entry with a direct (non
/// sum-factorized) quadrature loop over the topology's own geometric data.
fn dense_reference<C, const D: usize>(
    topology: &CellTopology<f64, D>,
    degree: usize,
    coefficient: &C,
) -> DMatrix<f64>
where
    C: CoefficientFunction<f64, D>,
{
    let n = degree + 1;
    let nodes: Vec<f64> = (0..n).map(|i| i as f64 / degree as f64).collect();
    let rule = gauss_interval(n);
    let n_local = topology.dofs_per_cell();
    let n_q = topology.q_points_per_cell();
    let mut matrix = DMatrix::zeros(topology.n_dofs(), topology.n_dofs());

    for batch in topology.colors() {
        for cell in 0..batch.num_cells() {
            let dofs = batch.cell_dofs(cell);
            for q in 0..n_q {
                let q_global = cell * n_q + q;
                let q_indices = multi_index::<D>(q, n);
                let point = &batch.quadrature_points()[q_global];
                let transform = &batch.gradient_transforms()[q_global];
                let weight = batch.jxw()[q_global];
                let coeff = coefficient.value(point);

                let physical_gradients: Vec<SVector<f64, D>> = (0..n_local)
                    .map(|i| {
                        let i_indices = multi_index::<D>(i, n);
                        let mut gradient = SVector::<f64, D>::zeros();
                        for d in 0..D {
                            let mut value = 1.0;
                            for (axis, &qa) in q_indices.iter().enumerate() {
                                let x = rule.points[qa];
                                value *= if axis == d {
                                    lagrange_derivative(&nodes, i_indices[axis], x)
                                } else {
                                    lagrange_value(&nodes, i_indices[axis], x)
                                };
                            }
                            gradient[d] = value;
                        }
                        transform * gradient
                    })
                    .collect();

                for (i, gi) in physical_gradients.iter().enumerate() {
                    for (j, gj) in physical_gradients.iter().enumerate() {
                        matrix[(dofs[i], dofs[j])] += weight * coeff * gj.dot(gi);
                    }
                }
            }
        }
    }
    matrix
}

fn reference_apply<const D: usize>(
    matrix: &DMatrix<f64>,
    topology: &CellTopology<f64, D>,
    src: &[f64],
) -> Vec<f64> {
    let result = matrix * DVector::from_column_slice(src);
    let mut result: Vec<f64> = result.iter().copied().collect();
    for &dof in topology.constrained_dofs() {
        result[dof] = src[dof];
    }
    result
}

fn apply<C, const D: usize, const DEGREE: usize>(
    coefficient: C,
    cells_per_dim: usize,
    src: &[f64],
) -> Vec<f64>
where
    C: CoefficientFunction<f64, D>,
{
    let device = device();
    let topology = Arc::new(unit_box_topology::<f64, D, DEGREE>(cells_per_dim).unwrap());
    let mut operator = LaplaceOperator::<f64, C, D, DEGREE>::new(&device, coefficient);
    operator.reinit(Arc::clone(&topology)).unwrap();
    let x = DeviceVector::from_host(&device, src);
    let mut y = DeviceVector::zeros(&device, src.len());
    operator.vmult(&mut y, &x).unwrap();
    y.to_host_vec()
}

#[test]
fn two_interval_cells_reproduce_the_analytic_stencil() {
    // Two linear cells on [0, 1], hat function at the midpoint: the
    // operator value at the center DOF is sum_cells sum_q w_q a(x_q) / h,
    // and the constrained end DOFs reproduce the input exactly
    let h = 0.5;
    let rule = gauss_interval(2);
    let coefficient = |x: f64| 1.0 / (0.05 + 2.0 * x * x);
    let mut expected_center = 0.0;
    for cell in 0..2 {
        for (point, weight) in rule.points.iter().zip(&rule.weights) {
            expected_center += weight * coefficient((cell as f64 + point) * h) / h;
        }
    }

    let result = apply::<_, 1, 1>(InverseQuadratic, 2, &[0.0, 1.0, 0.0]);
    assert_eq!(result[0], 0.0);
    assert_eq!(result[2], 0.0);
    assert_relative_eq!(result[1], expected_center, max_relative = 1e-13);
}

#[test]
fn matches_dense_reference_in_1d() {
    let topology = unit_box_topology::<f64, 1, 3>(3).unwrap();
    let matrix = dense_reference(&topology, 3, &InverseQuadratic);
    let src: Vec<f64> = (0..topology.n_dofs()).map(|i| (i as f64 * 0.7).sin()).collect();
    let expected = reference_apply(&matrix, &topology, &src);
    let result = apply::<_, 1, 3>(InverseQuadratic, 3, &src);
    for (r, e) in result.iter().zip(&expected) {
        assert_relative_eq!(*r, *e, epsilon = 1e-11, max_relative = 1e-10);
    }
}

#[test]
fn matches_dense_reference_in_2d() {
    let topology = unit_box_topology::<f64, 2, 2>(3).unwrap();
    let matrix = dense_reference(&topology, 2, &InverseQuadratic);
    let src: Vec<f64> = (0..topology.n_dofs())
        .map(|i| (i as f64 * 0.3).cos() + 0.1 * i as f64)
        .collect();
    let expected = reference_apply(&matrix, &topology, &src);
    let result = apply::<_, 2, 2>(InverseQuadratic, 3, &src);
    for (r, e) in result.iter().zip(&expected) {
        assert_relative_eq!(*r, *e, epsilon = 1e-11, max_relative = 1e-10);
    }
}

#[test]
fn matches_dense_reference_in_3d() {
    let topology = unit_box_topology::<f64, 3, 1>(2).unwrap();
    let matrix = dense_reference(&topology, 1, &InverseQuadratic);
    let src: Vec<f64> = (0..topology.n_dofs()).map(|i| ((i * i) % 7) as f64 - 3.0).collect();
    let expected = reference_apply(&matrix, &topology, &src);
    let result = apply::<_, 3, 1>(InverseQuadratic, 2, &src);
    for (r, e) in result.iter().zip(&expected) {
        assert_relative_eq!(*r, *e, epsilon = 1e-11, max_relative = 1e-10);
    }
}

#[test]
fn constant_functions_lie_in_the_kernel_of_the_interior() {
    // With any coefficient, the discrete Laplacian of a constant vanishes
    // at every unconstrained DOF; constrained DOFs reproduce the input
    let topology = unit_box_topology::<f64, 2, 1>(4).unwrap();
    let src = vec![3.0; topology.n_dofs()];
    let result = apply::<_, 2, 1>(Constant(1.0), 4, &src);
    let constrained = topology.constrained_dofs();
    for (dof, &value) in result.iter().enumerate() {
        if constrained.contains(&dof) {
            assert_eq!(value, 3.0);
        } else {
            assert!(value.abs() < 1e-11, "interior DOF {dof} holds {value}");
        }
    }
}

#[test]
fn repeated_applies_are_bitwise_identical() {
    let device = device();
    let topology = Arc::new(unit_box_topology::<f64, 2, 2>(3).unwrap());
    let mut operator =
        LaplaceOperator::<f64, InverseQuadratic, 2, 2>::new(&device, InverseQuadratic);
    operator.reinit(Arc::clone(&topology)).unwrap();
    let src_host: Vec<f64> = (0..topology.n_dofs()).map(|i| (i as f64).sin()).collect();
    let src = DeviceVector::from_host(&device, &src_host);
    let mut dst = DeviceVector::zeros(&device, topology.n_dofs());

    operator.vmult(&mut dst, &src).unwrap();
    let first = dst.to_host_vec();
    for _ in 0..5 {
        operator.vmult(&mut dst, &src).unwrap();
        assert_eq!(dst.to_host_vec(), first);
    }
}

#[test]
fn vmult_add_accumulates_in_the_interior() {
    let device = device();
    let topology = Arc::new(unit_box_topology::<f64, 1, 1>(4).unwrap());
    let n = topology.n_dofs();
    let mut operator =
        LaplaceOperator::<f64, InverseQuadratic, 1, 1>::new(&device, InverseQuadratic);
    operator.reinit(Arc::clone(&topology)).unwrap();

    let src_host: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let src = DeviceVector::from_host(&device, &src_host);
    let mut plain = DeviceVector::zeros(&device, n);
    operator.vmult(&mut plain, &src).unwrap();

    let mut accumulated = DeviceVector::zeros(&device, n);
    accumulated.fill(1.0).unwrap();
    operator.vmult_add(&mut accumulated, &src).unwrap();

    let plain = plain.to_host_vec();
    let accumulated = accumulated.to_host_vec();
    let constrained = topology.constrained_dofs();
    for dof in 0..n {
        if constrained.contains(&dof) {
            // The constraint pass overwrites rather than accumulates
            assert_eq!(accumulated[dof], src_host[dof]);
        } else {
            assert_relative_eq!(accumulated[dof], 1.0 + plain[dof], max_relative = 1e-13);
        }
    }
}

#[test]
fn cached_diagonal_is_consistent_with_unit_vector_probes() {
    let device = device();
    let topology = Arc::new(unit_box_topology::<f64, 2, 1>(3).unwrap());
    let n = topology.n_dofs();
    let mut operator =
        LaplaceOperator::<f64, InverseQuadratic, 2, 1>::new(&device, InverseQuadratic);
    operator.reinit(Arc::clone(&topology)).unwrap();

    let mut probed = vec![0.0; n];
    let mut basis = DeviceVector::zeros(&device, n);
    let mut column = DeviceVector::zeros(&device, n);
    for i in 0..n {
        basis.fill(0.0).unwrap();
        let mut host = vec![0.0; n];
        host[i] = 1.0;
        basis.copy_from_host(&host).unwrap();
        operator.vmult(&mut column, &basis).unwrap();
        probed[i] = column.to_host_vec()[i];
    }

    operator.set_diagonal(&probed).unwrap();
    let cached = operator.diagonal().unwrap().to_host_vec();
    let constrained = topology.constrained_dofs();
    for i in 0..n {
        if constrained.contains(&i) {
            assert_eq!(cached[i], 1.0);
        } else {
            assert_relative_eq!(cached[i], probed[i]);
            assert!(probed[i] > 0.0);
        }
    }
}

#[test]
fn state_machine_rejects_premature_and_malformed_calls() {
    let device = device();
    let mut operator =
        LaplaceOperator::<f64, InverseQuadratic, 2, 1>::new(&device, InverseQuadratic);
    assert_eq!(operator.m(), 0);
    assert_eq!(operator.memory_consumption(), 0);

    let mut dst = DeviceVector::zeros(&device, 4);
    let src = DeviceVector::zeros(&device, 4);
    assert!(matches!(
        operator.vmult(&mut dst, &src),
        Err(Error::NotInitialized)
    ));
    assert!(matches!(operator.diagonal(), Err(Error::NotInitialized)));
    assert!(matches!(
        operator.set_diagonal(&[1.0; 4]),
        Err(Error::NotInitialized)
    ));

    let topology = Arc::new(unit_box_topology::<f64, 2, 1>(2).unwrap());
    operator.reinit(Arc::clone(&topology)).unwrap();
    assert_eq!(operator.m(), topology.n_dofs());
    assert_eq!(operator.n(), operator.m());
    assert!(operator.memory_consumption() > 0);

    // Wrong vector lengths are rejected before any device work
    assert!(matches!(
        operator.vmult(&mut dst, &src),
        Err(Error::DimensionMismatch { .. })
    ));
    let empty = DeviceVector::<f64>::new(&device);
    let mut good = DeviceVector::zeros(&device, topology.n_dofs());
    assert!(matches!(
        operator.vmult(&mut good, &empty),
        Err(Error::Uninitialized)
    ));
    assert!(matches!(
        operator.set_diagonal(&[1.0; 3]),
        Err(Error::DimensionMismatch { .. })
    ));

    // Entry access is never available
    assert!(matches!(operator.el(0, 0), Err(Error::NotImplemented)));

    // reinit discards a cached diagonal
    operator.set_diagonal(&vec![1.0; topology.n_dofs()]).unwrap();
    assert!(operator.diagonal().is_ok());
    operator.reinit(Arc::clone(&topology)).unwrap();
    assert!(matches!(operator.diagonal(), Err(Error::NotInitialized)));

    operator.clear();
    assert_eq!(operator.m(), 0);
    assert_eq!(operator.memory_consumption(), 0);
}

#[test]
fn mismatched_element_topology_is_rejected_at_reinit() {
    let device = device();
    // Degree-2 topology fed to a degree-1 operator instantiation
    let topology = Arc::new(unit_box_topology::<f64, 2, 2>(2).unwrap());
    let mut operator =
        LaplaceOperator::<f64, InverseQuadratic, 2, 1>::new(&device, InverseQuadratic);
    assert!(matches!(
        operator.reinit(topology),
        Err(Error::DimensionMismatch { .. })
    ));
}

#[test]
fn conflicting_cell_partitions_are_rejected() {
    // Two interval cells sharing DOF 1 must never land in one color; the
    // checked partition constructor is the structural safety net
    let err = DisjointBlocks::try_new(vec![0, 1, 1, 2], 2, vec![0, 1]).unwrap_err();
    assert_eq!(err.index, 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn apply_is_linear(
        x_host in vec(-10.0..10.0f64, 16),
        y_host in vec(-10.0..10.0f64, 16),
        a in -2.0..2.0f64,
        b in -2.0..2.0f64,
    ) {
        let device = device();
        let topology = Arc::new(unit_box_topology::<f64, 2, 1>(3).unwrap());
        prop_assert_eq!(topology.n_dofs(), 16);
        let mut operator =
            LaplaceOperator::<f64, InverseQuadratic, 2, 1>::new(&device, InverseQuadratic);
        operator.reinit(Arc::clone(&topology)).unwrap();

        let x = DeviceVector::from_host(&device, &x_host);
        let y = DeviceVector::from_host(&device, &y_host);
        let mut combined = DeviceVector::zeros(&device, 16);
        combined.assign_scaled(a, &x).unwrap();
        combined.axpy(b, &y).unwrap();

        let mut ax = DeviceVector::zeros(&device, 16);
        let mut ay = DeviceVector::zeros(&device, 16);
        let mut a_combined = DeviceVector::zeros(&device, 16);
        operator.vmult(&mut ax, &x).unwrap();
        operator.vmult(&mut ay, &y).unwrap();
        operator.vmult(&mut a_combined, &combined).unwrap();

        ax.scale_mut(a).unwrap();
        ax.axpy(b, &ay).unwrap();
        let expected = ax.to_host_vec();
        for (c, e) in a_combined.to_host_vec().iter().zip(&expected) {
            prop_assert!((c - e).abs() <= 1e-9 * (1.0 + e.abs()));
        }
    }

    #[test]
    fn apply_is_symmetric(
        mut x_host in vec(-5.0..5.0f64, 16),
        mut y_host in vec(-5.0..5.0f64, 16),
    ) {
        let device = device();
        let topology = Arc::new(unit_box_topology::<f64, 2, 1>(3).unwrap());
        let mut operator =
            LaplaceOperator::<f64, InverseQuadratic, 2, 1>::new(&device, InverseQuadratic);
        operator.reinit(Arc::clone(&topology)).unwrap();

        // Solver iterates live in the free subspace: both vectors vanish on
        // the constrained DOFs, where the operator acts as the identity
        for &dof in topology.constrained_dofs() {
            x_host[dof] = 0.0;
            y_host[dof] = 0.0;
        }

        let x = DeviceVector::from_host(&device, &x_host);
        let y = DeviceVector::from_host(&device, &y_host);
        let mut ax = DeviceVector::zeros(&device, 16);
        let mut ay = DeviceVector::zeros(&device, 16);
        operator.vmult(&mut ax, &x).unwrap();
        operator.tvmult(&mut ay, &y).unwrap();

        let left = ax.dot(&y).unwrap();
        let right = x.dot(&ay).unwrap();
        prop_assert!((left - right).abs() <= 1e-9 * (1.0 + left.abs().max(right.abs())));
    }

    #[test]
    fn apply_acts_as_identity_on_constrained_dofs(
        src_host in vec(-100.0..100.0f64, 16),
    ) {
        let topology = unit_box_topology::<f64, 2, 1>(3).unwrap();
        let result = apply::<_, 2, 1>(InverseQuadratic, 3, &src_host);
        for &dof in topology.constrained_dofs() {
            // Exact reproduction, not merely within tolerance
            prop_assert_eq!(result[dof], src_host[dof]);
        }
    }
}
