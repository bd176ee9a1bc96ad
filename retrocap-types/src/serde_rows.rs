//! Row-major JSON representation for fixed-size nalgebra matrices.
//!
//! nalgebra's own serde impl writes static matrices as flat column-major
//! arrays, which does not match the nested row-major shape the supervisor
//! protocol documents. These `#[serde(with = ...)]` modules bridge the gap.

pub mod matrix3 {
    use nalgebra::Matrix3;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(m: &Matrix3<f64>, ser: S) -> Result<S::Ok, S::Error> {
        let rows: [[f64; 3]; 3] = [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ];
        rows.serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Matrix3<f64>, D::Error> {
        let rows = <[[f64; 3]; 3]>::deserialize(de)?;
        Ok(Matrix3::from_fn(|r, c| rows[r][c]))
    }
}

pub mod matrix4 {
    use nalgebra::Matrix4;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(m: &Matrix4<f64>, ser: S) -> Result<S::Ok, S::Error> {
        let mut rows = [[0.0f64; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = m[(r, c)];
            }
        }
        rows.serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Matrix4<f64>, D::Error> {
        let rows = <[[f64; 4]; 4]>::deserialize(de)?;
        Ok(Matrix4::from_fn(|r, c| rows[r][c]))
    }
}
