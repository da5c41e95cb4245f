use approx::assert_relative_eq;
use cellwise::device::Device;
use cellwise::vector::DeviceVector;
use cellwise::Error;
use std::sync::Arc;

fn device() -> Arc<Device> {
    Device::with_threads(2).unwrap()
}

#[test]
fn axpy_updates_in_place() {
    let device = device();
    let mut y = DeviceVector::from_host(&device, &[1.0, 2.0, 3.0]);
    let x = DeviceVector::from_host(&device, &[4.0, 5.0, 6.0]);
    y.axpy(2.0, &x).unwrap();
    assert_eq!(y.to_host_vec(), vec![9.0, 12.0, 15.0]);
}

#[test]
fn sadd_scales_both_operands() {
    let device = device();
    let mut y = DeviceVector::from_host(&device, &[1.0, 2.0]);
    let x = DeviceVector::from_host(&device, &[10.0, 20.0]);
    y.sadd(3.0, 0.5, &x).unwrap();
    assert_eq!(y.to_host_vec(), vec![8.0, 16.0]);
}

#[test]
fn assign_scaled_overwrites() {
    let device = device();
    let mut y = DeviceVector::from_host(&device, &[7.0, 7.0]);
    let x = DeviceVector::from_host(&device, &[1.0, -2.0]);
    y.assign_scaled(-1.5, &x).unwrap();
    assert_eq!(y.to_host_vec(), vec![-1.5, 3.0]);
}

#[test]
fn sub_assign_is_an_axpy_with_unit_weight() {
    let device = device();
    let mut y = DeviceVector::from_host(&device, &[5.0, 6.0]);
    let x = DeviceVector::from_host(&device, &[1.0, 4.0]);
    y.sub_assign(&x).unwrap();
    assert_eq!(y.to_host_vec(), vec![4.0, 2.0]);
}

#[test]
fn dot_and_norm() {
    let device = device();
    let x = DeviceVector::from_host(&device, &[3.0, 4.0]);
    let y = DeviceVector::from_host(&device, &[1.0, 2.0]);
    assert_relative_eq!(x.dot(&y).unwrap(), 11.0);
    assert_relative_eq!(x.norm().unwrap(), 5.0);
}

#[test]
fn add_and_dot_fuses_update_and_measurement() {
    let device = device();
    let values: Vec<f64> = (0..2500).map(|i| i as f64 * 0.25).collect();
    let mut y = DeviceVector::from_host(&device, &values);
    let x = DeviceVector::from_host(&device, &vec![1.0; values.len()]);
    let v = DeviceVector::from_host(&device, &vec![2.0; values.len()]);

    let mut expected_y = values.clone();
    for entry in &mut expected_y {
        *entry += -0.5;
    }
    let expected_dot: f64 = expected_y.iter().map(|&e| e * 2.0).sum();

    let result = y.add_and_dot(-0.5, &x, &v).unwrap();
    assert_eq!(y.to_host_vec(), expected_y);
    assert_relative_eq!(result, expected_dot, max_relative = 1e-12);
}

#[test]
fn componentwise_multiply_and_divide() {
    let device = device();
    let mut y = DeviceVector::from_host(&device, &[2.0, 9.0, 8.0]);
    let x = DeviceVector::from_host(&device, &[2.0, 3.0, 4.0]);
    y.component_mul_assign(&x).unwrap();
    assert_eq!(y.to_host_vec(), vec![4.0, 27.0, 32.0]);
    y.component_div_assign(&x).unwrap();
    assert_eq!(y.to_host_vec(), vec![2.0, 9.0, 8.0]);
}

#[test]
fn fill_scale_and_all_zero() {
    let device = device();
    let mut x = DeviceVector::zeros(&device, 4);
    assert!(x.all_zero().unwrap());
    x.fill(2.5).unwrap();
    assert_eq!(x.to_host_vec(), vec![2.5; 4]);
    assert!(!x.all_zero().unwrap());
    x.scale_mut(-2.0).unwrap();
    assert_eq!(x.to_host_vec(), vec![-5.0; 4]);
}

#[test]
fn swap_exchanges_buffers_without_copying() {
    let device = device();
    let mut x = DeviceVector::from_host(&device, &[1.0, 2.0]);
    let mut y = DeviceVector::from_host(&device, &[3.0, 4.0, 5.0]);
    x.swap(&mut y);
    assert_eq!(x.to_host_vec(), vec![3.0, 4.0, 5.0]);
    assert_eq!(y.to_host_vec(), vec![1.0, 2.0]);
}

#[test]
fn host_transfer_round_trip() {
    let device = device();
    let mut x = DeviceVector::zeros(&device, 3);
    x.copy_from_host(&[1.0, 2.0, 3.0]).unwrap();
    let mut out = [0.0; 3];
    x.copy_to_host(&mut out).unwrap();
    assert_eq!(out, [1.0, 2.0, 3.0]);
}

#[test]
fn resize_reallocates() {
    let device = device();
    let mut x = DeviceVector::<f64>::new(&device);
    assert_eq!(x.len(), 0);
    x.resize(5);
    assert_eq!(x.len(), 5);
    assert_eq!(x.memory_consumption(), 5 * std::mem::size_of::<f64>());
}

#[test]
fn mismatched_lengths_are_rejected_before_any_work() {
    let device = device();
    let mut y = DeviceVector::from_host(&device, &[1.0, 2.0]);
    let x = DeviceVector::from_host(&device, &[1.0, 2.0, 3.0]);
    let before = y.to_host_vec();
    for result in [
        y.axpy(1.0, &x),
        y.sadd(1.0, 1.0, &x),
        y.component_mul_assign(&x),
        y.dot(&x).map(|_| ()),
        y.copy_from_host(&[0.0; 4]),
    ] {
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch {
                expected: 2,
                found: _
            })
        ));
    }
    assert_eq!(y.to_host_vec(), before);
}

#[test]
fn degenerate_vector_only_supports_resize_and_zero_fill() {
    let device = device();
    let mut x = DeviceVector::<f64>::new(&device);
    assert!(x.fill(0.0).is_ok());
    assert!(matches!(x.fill(1.0), Err(Error::Uninitialized)));
    assert!(matches!(x.norm(), Err(Error::Uninitialized)));
    assert!(matches!(x.all_zero(), Err(Error::Uninitialized)));
    let other = DeviceVector::<f64>::new(&device);
    assert!(matches!(x.dot(&other), Err(Error::Uninitialized)));
    x.resize(2);
    assert!(x.fill(1.0).is_ok());
}
