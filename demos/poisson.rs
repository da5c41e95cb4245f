//! Solve a variable-coefficient Poisson problem on the unit square with a
//! Jacobi-preconditioned conjugate gradient method, driven entirely by the
//! matrix-free operator: the system matrix is never assembled.

use cellwise::coefficient::InverseQuadratic;
use cellwise::device::Device;
use cellwise::operator::LaplaceOperator;
use cellwise::procedural::unit_box_topology;
use cellwise::vector::DeviceVector;
use std::sync::Arc;

const DIM: usize = 2;
const DEGREE: usize = 1;
const CELLS_PER_DIM: usize = 8;

fn main() -> Result<(), cellwise::Error> {
    let device = Device::new()?;
    let topology = Arc::new(unit_box_topology::<f64, DIM, DEGREE>(CELLS_PER_DIM)?);
    let n = topology.n_dofs();

    let mut operator =
        LaplaceOperator::<f64, InverseQuadratic, DIM, DEGREE>::new(&device, InverseQuadratic);
    operator.reinit(Arc::clone(&topology))?;
    println!(
        "operator: {} DOFs, {} cells in {} colors, {} device bytes",
        operator.m(),
        topology.n_cells(),
        topology.num_colors(),
        operator.memory_consumption()
    );

    // Derive the diagonal by probing with unit vectors and cache it for
    // the Jacobi preconditioner
    let mut diagonal = vec![0.0; n];
    let mut probe = DeviceVector::zeros(&device, n);
    let mut column = DeviceVector::zeros(&device, n);
    for i in 0..n {
        let mut host = vec![0.0; n];
        host[i] = 1.0;
        probe.copy_from_host(&host)?;
        operator.vmult(&mut column, &probe)?;
        diagonal[i] = column.to_host_vec()[i];
    }
    operator.set_diagonal(&diagonal)?;
    let diagonal = operator.diagonal()?.clone();

    // Unit source term, mass-lumped, with homogeneous Dirichlet data
    let cell_volume = (1.0 / CELLS_PER_DIM as f64).powi(DIM as i32);
    let constrained = topology.constrained_dofs();
    let rhs: Vec<f64> = (0..n)
        .map(|i| {
            if constrained.contains(&i) {
                0.0
            } else {
                cell_volume
            }
        })
        .collect();

    // Preconditioned conjugate gradients on the free subspace
    let mut x = DeviceVector::zeros(&device, n);
    let mut r = DeviceVector::from_host(&device, &rhs);
    let mut z = DeviceVector::zeros(&device, n);
    z.assign_scaled(1.0, &r)?;
    z.component_div_assign(&diagonal)?;
    let mut p = z.clone();
    let mut ap = DeviceVector::zeros(&device, n);
    let mut rz = r.dot(&z)?;
    let rhs_norm = r.norm()?;

    let mut iteration = 0;
    loop {
        let residual_norm = r.norm()?;
        if residual_norm <= 1e-10 * rhs_norm || iteration >= 200 {
            println!(
                "converged to relative residual {:.3e} in {} iterations",
                residual_norm / rhs_norm,
                iteration
            );
            break;
        }

        operator.vmult(&mut ap, &p)?;
        let alpha = rz / p.dot(&ap)?;
        x.axpy(alpha, &p)?;
        r.axpy(-alpha, &ap)?;

        z.assign_scaled(1.0, &r)?;
        z.component_div_assign(&diagonal)?;
        let rz_next = r.dot(&z)?;
        let beta = rz_next / rz;
        p.sadd(beta, 1.0, &z)?;
        rz = rz_next;
        iteration += 1;
    }

    // Value at the center node of the square
    let solution = x.to_host_vec();
    let nodes_per_dim = DEGREE * CELLS_PER_DIM + 1;
    let center = (nodes_per_dim / 2) * nodes_per_dim + nodes_per_dim / 2;
    println!("u(0.5, 0.5) = {:.6}", solution[center]);

    Ok(())
}
