//! Tabulated 1-D shape functions for tensor-product elements.
//!
//! A [`ShapeTable`] holds the values and first derivatives of the nodal
//! Lagrange basis on `[0, 1]` at the points of the Gauss rule with one point
//! per basis function. Multi-dimensional basis evaluation never materializes
//! `dim`-dimensional shape functions; the per-cell kernel applies this 1-D
//! table once per spatial direction instead.

use crate::quadrature::gauss_interval;
use crate::Real;

/// Values and gradients of the degree-`p` nodal Lagrange basis at the
/// `p + 1` Gauss points of `[0, 1]`, stored row-major by quadrature point.
#[derive(Debug, Clone)]
pub struct ShapeTable<T> {
    points_1d: usize,
    values: Vec<T>,
    gradients: Vec<T>,
    quad_points: Vec<T>,
    quad_weights: Vec<T>,
}

impl<T: Real> ShapeTable<T> {
    /// Build the table for polynomial degree `degree >= 1`, with nodes
    /// equispaced on `[0, 1]`.
    pub fn lagrange(degree: usize) -> Self {
        assert!(degree >= 1, "polynomial degree must be at least 1");
        let n = degree + 1;
        let rule = gauss_interval(n);
        let nodes: Vec<f64> = (0..n).map(|i| i as f64 / degree as f64).collect();

        let mut values = Vec::with_capacity(n * n);
        let mut gradients = Vec::with_capacity(n * n);
        for &x in &rule.points {
            for i in 0..n {
                values.push(nalgebra::convert(lagrange_value(&nodes, i, x)));
                gradients.push(nalgebra::convert(lagrange_derivative(&nodes, i, x)));
            }
        }

        Self {
            points_1d: n,
            values,
            gradients,
            quad_points: rule.points.iter().map(|&x| nalgebra::convert(x)).collect(),
            quad_weights: rule.weights.iter().map(|&w| nalgebra::convert(w)).collect(),
        }
    }

    /// Number of 1-D basis functions, equal to the number of 1-D quadrature
    /// points.
    pub fn points_1d(&self) -> usize {
        self.points_1d
    }

    /// `phi_i` evaluated at quadrature point `q`.
    pub fn value(&self, q: usize, i: usize) -> T {
        self.values[q * self.points_1d + i]
    }

    /// `d phi_i / dx` evaluated at quadrature point `q`.
    pub fn gradient(&self, q: usize, i: usize) -> T {
        self.gradients[q * self.points_1d + i]
    }

    /// Row-major `[q][i]` value matrix.
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Row-major `[q][i]` gradient matrix.
    pub fn gradients(&self) -> &[T] {
        &self.gradients
    }

    pub fn quad_points(&self) -> &[T] {
        &self.quad_points
    }

    pub fn quad_weights(&self) -> &[T] {
        &self.quad_weights
    }
}

fn lagrange_value(nodes: &[f64], i: usize, x: f64) -> f64 {
    let xi = nodes[i];
    nodes
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != i)
        .map(|(_, &xj)| (x - xj) / (xi - xj))
        .product()
}

fn lagrange_derivative(nodes: &[f64], i: usize, x: f64) -> f64 {
    let xi = nodes[i];
    let mut sum = 0.0;
    for (k, &xk) in nodes.iter().enumerate() {
        if k == i {
            continue;
        }
        let mut term = 1.0 / (xi - xk);
        for (j, &xj) in nodes.iter().enumerate() {
            if j != i && j != k {
                term *= (x - xj) / (xi - xj);
            }
        }
        sum += term;
    }
    sum
}
