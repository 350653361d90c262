//! Types, aliases and helper operations for doing math with `ultraviolet`.
pub use ultraviolet as uv;

pub type Vec2 = uv::Vec2;
pub type Vec3 = uv::Vec3;
pub type Mat2 = uv::Mat2;
pub type Mat3 = uv::Mat3;

/// Threshold below which determinants, areas and gradient norms are treated as zero.
pub const EPSILON: f32 = 1e-6;

/// Area of the triangle spanned by three points.
#[inline]
pub fn triangle_area(p0: Vec3, p1: Vec3, p2: Vec3) -> f32 {
    0.5 * (p1 - p0).cross(p2 - p0).mag()
}

/// Cotangent of the angle between two vectors.
///
/// Returns zero for parallel vectors rather than infinity.
#[inline]
pub fn cot_between(a: Vec3, b: Vec3) -> f32 {
    let sin = a.cross(b).mag();
    if sin <= EPSILON {
        return 0.0;
    }
    a.dot(b) / sin
}

/// Sum of the diagonal entries.
#[inline]
pub fn trace(m: &Mat3) -> f32 {
    m.cols[0].x + m.cols[1].y + m.cols[2].z
}

/// Frobenius inner product `A : B`.
#[inline]
pub fn double_dot(a: &Mat3, b: &Mat3) -> f32 {
    a.cols[0].dot(b.cols[0]) + a.cols[1].dot(b.cols[1]) + a.cols[2].dot(b.cols[2])
}

// component-wise utils

/// Index of the smallest component, preferring x, then y, then z on ties.
#[inline]
pub fn min_axis(v: Vec3) -> usize {
    if v.x <= v.y && v.x <= v.z {
        0
    } else if v.y <= v.z {
        1
    } else {
        2
    }
}

#[inline]
pub fn axis(v: Vec3, idx: usize) -> f32 {
    match idx {
        0 => v.x,
        1 => v.y,
        _ => v.z,
    }
}

#[inline]
pub fn unit_axis(idx: usize) -> Vec3 {
    match idx {
        0 => Vec3::unit_x(),
        1 => Vec3::unit_y(),
        _ => Vec3::unit_z(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cotangent_of_right_angle_is_zero() {
        assert!(cot_between(Vec3::unit_x(), Vec3::unit_y()).abs() < 1e-7);
        let c = cot_between(Vec3::unit_x(), Vec3::new(1.0, 1.0, 0.0));
        assert!((c - 1.0).abs() < 1e-6);
    }

    #[test]
    fn parallel_vectors_have_zero_cotangent() {
        assert_eq!(cot_between(Vec3::unit_x(), Vec3::unit_x() * 2.0), 0.0);
    }

    #[test]
    fn min_axis_prefers_lower_index() {
        assert_eq!(min_axis(Vec3::new(1.0, 1.0, 1.0)), 0);
        assert_eq!(min_axis(Vec3::new(2.0, 1.0, 1.0)), 1);
        assert_eq!(min_axis(Vec3::new(2.0, 3.0, 1.0)), 2);
    }
}
