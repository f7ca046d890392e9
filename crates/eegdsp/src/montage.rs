//! Standard sensor layouts.
//!
//! `standard_1020` is generated from the 10-10 system on a spherical head of
//! radius 95 mm. Head coordinates: +x right, +y nasion, +z vertex. Each
//! coronal row runs along the great circle from its midline electrode to the
//! equator at the row's edge azimuth; numbered columns sit at quarter steps,
//! with 9/10 one step past the equator.

use std::collections::HashMap;
use std::f64::consts::PI;

use crate::error::{DspError, Result};

const HEAD_RADIUS_M: f64 = 0.095;

/// Named 3D sensor positions.
#[derive(Debug, Clone)]
pub struct Montage {
    pub kind: String,
    ch_names: Vec<String>,
    positions: Vec<[f64; 3]>,
}

impl Montage {
    pub fn ch_names(&self) -> &[String] {
        &self.ch_names
    }

    pub fn len(&self) -> usize {
        self.ch_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ch_names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<[f64; 3]> {
        self.ch_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.positions[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, [f64; 3])> {
        self.ch_names
            .iter()
            .map(String::as_str)
            .zip(self.positions.iter().copied())
    }

    pub fn rename_channels(&mut self, mapping: &HashMap<String, String>) {
        for name in self.ch_names.iter_mut() {
            if let Some(new_name) = mapping.get(name.as_str()) {
                *name = new_name.clone();
            }
        }
    }

    pub fn upper_case(&mut self) {
        for name in self.ch_names.iter_mut() {
            *name = name.to_uppercase();
        }
    }

    fn push(&mut self, name: impl Into<String>, unit: [f64; 3]) {
        self.ch_names.push(name.into());
        self.positions.push(unit.map(|v| v * HEAD_RADIUS_M));
    }
}

/// Build a named standard montage. Only `standard_1020` is available.
pub fn make_standard_montage(name: &str) -> Result<Montage> {
    match name {
        "standard_1020" => Ok(standard_1020()),
        other => Err(DspError::InvalidArgument(format!(
            "unknown montage {:?}",
            other
        ))),
    }
}

struct Row {
    prefix: &'static str,
    /// Prefix used for columns 7/8 and 9/10 where the name changes at the edge.
    edge_prefix: &'static str,
    midline: &'static str,
    /// Sagittal angle of the midline electrode from the vertex, forward positive.
    sagittal_deg: f64,
    /// Azimuth offset of the row's equator crossing from the nasion.
    edge_deg: f64,
    columns: &'static [usize],
}

const FULL: &[usize] = &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10];

const ROWS: &[Row] = &[
    Row { prefix: "AF", edge_prefix: "AF", midline: "AFz", sagittal_deg: 67.5, edge_deg: 36.0, columns: FULL },
    Row { prefix: "F", edge_prefix: "F", midline: "Fz", sagittal_deg: 45.0, edge_deg: 54.0, columns: FULL },
    Row { prefix: "FC", edge_prefix: "FT", midline: "FCz", sagittal_deg: 22.5, edge_deg: 72.0, columns: FULL },
    Row { prefix: "C", edge_prefix: "T", midline: "Cz", sagittal_deg: 0.0, edge_deg: 90.0, columns: FULL },
    Row { prefix: "CP", edge_prefix: "TP", midline: "CPz", sagittal_deg: -22.5, edge_deg: 108.0, columns: FULL },
    Row { prefix: "P", edge_prefix: "P", midline: "Pz", sagittal_deg: -45.0, edge_deg: 126.0, columns: FULL },
    Row { prefix: "PO", edge_prefix: "PO", midline: "POz", sagittal_deg: -67.5, edge_deg: 144.0, columns: FULL },
];

fn standard_1020() -> Montage {
    let mut m = Montage {
        kind: "standard_1020".to_string(),
        ch_names: Vec::new(),
        positions: Vec::new(),
    };

    m.push("Nz", midline_point(112.5));
    // Fp and O rows lie on the equator; only the edge columns exist.
    m.push("Fp1", spherical(90.0, 90.0 + 18.0));
    m.push("Fpz", midline_point(90.0));
    m.push("Fp2", spherical(90.0, 90.0 - 18.0));

    for row in ROWS {
        let mid = midline_point(row.sagittal_deg);
        m.push(row.midline, mid);
        for &n in row.columns {
            let left = n % 2 == 1;
            let step = n.div_ceil(2);
            let azimuth = if left { 90.0 + row.edge_deg } else { 90.0 - row.edge_deg };
            let edge = spherical(90.0, azimuth);
            let prefix = if step >= 4 { row.edge_prefix } else { row.prefix };
            m.push(format!("{}{}", prefix, n), slerp(mid, edge, step as f64 / 4.0));
        }
    }

    m.push("O1", spherical(90.0, 90.0 + 162.0));
    m.push("Oz", midline_point(-90.0));
    m.push("O2", spherical(90.0, 90.0 - 162.0));
    m.push("Iz", midline_point(-112.5));

    for (alias, target) in [("T3", "T7"), ("T4", "T8"), ("T5", "P7"), ("T6", "P8")] {
        if let Some(pos) = m.position(target) {
            m.ch_names.push(alias.to_string());
            m.positions.push(pos);
        }
    }
    m
}

/// Unit vector for polar angle `theta` (from +z) and azimuth `phi` (from +x).
fn spherical(theta_deg: f64, phi_deg: f64) -> [f64; 3] {
    let (theta, phi) = (theta_deg * PI / 180.0, phi_deg * PI / 180.0);
    [
        theta.sin() * phi.cos(),
        theta.sin() * phi.sin(),
        theta.cos(),
    ]
}

fn midline_point(sagittal_deg: f64) -> [f64; 3] {
    let phi = if sagittal_deg >= 0.0 { 90.0 } else { -90.0 };
    spherical(sagittal_deg.abs(), phi)
}

/// Spherical interpolation along the great circle through `a` and `b`;
/// `t > 1` continues past `b`.
fn slerp(a: [f64; 3], b: [f64; 3], t: f64) -> [f64; 3] {
    let dot = (a[0] * b[0] + a[1] * b[1] + a[2] * b[2]).clamp(-1.0, 1.0);
    let omega = dot.acos();
    if omega.abs() < 1e-12 {
        return a;
    }
    let wa = ((1.0 - t) * omega).sin() / omega.sin();
    let wb = (t * omega).sin() / omega.sin();
    [
        wa * a[0] + wb * b[0],
        wa * a[1] + wb * b[1],
        wa * a[2] + wb * b[2],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn norm(p: [f64; 3]) -> f64 {
        (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt()
    }

    #[test]
    fn unknown_montage_is_rejected() {
        assert!(matches!(
            make_standard_montage("biosemi64"),
            Err(DspError::InvalidArgument(_))
        ));
    }

    #[test]
    fn all_positions_on_sphere() {
        let m = make_standard_montage("standard_1020").unwrap();
        for (name, pos) in m.iter() {
            assert_abs_diff_eq!(norm(pos), HEAD_RADIUS_M, epsilon = 1e-9);
            assert!(!name.is_empty());
        }
    }

    #[test]
    fn landmarks() {
        let m = make_standard_montage("standard_1020").unwrap();
        let cz = m.position("Cz").unwrap();
        assert_abs_diff_eq!(cz[2], HEAD_RADIUS_M, epsilon = 1e-12);
        let t7 = m.position("T7").unwrap();
        assert_abs_diff_eq!(t7[0], -HEAD_RADIUS_M, epsilon = 1e-12);
        assert_eq!(m.position("T3"), Some(t7));
        let c4 = m.position("C4").unwrap();
        assert!(c4[0] > 0.0, "even numbers are on the right");
        let fp1 = m.position("Fp1").unwrap();
        assert!(fp1[1] > 0.0 && fp1[0] < 0.0);
        let t9 = m.position("T9").unwrap();
        assert!(t9[2] < 0.0, "T9 sits below the equator");
    }

    #[test]
    fn expected_names_present_once() {
        let m = make_standard_montage("standard_1020").unwrap();
        for name in ["Fpz", "AF3", "F10", "FT7", "FC1", "TP8", "CPz", "P9", "PO8", "Oz", "T6"] {
            let count = m.ch_names().iter().filter(|n| *n == name).count();
            assert_eq!(count, 1, "{name}");
        }
        assert!(m.position("FC7").is_none());
    }

    #[test]
    fn rename_then_upper_case() {
        let mut m = make_standard_montage("standard_1020").unwrap();
        let mapping = HashMap::from([("Cz".to_string(), "Vertex".to_string())]);
        m.rename_channels(&mapping);
        m.upper_case();
        assert!(m.position("VERTEX").is_some());
        assert!(m.position("Cz").is_none());
        assert!(m.position("FP1").is_some());
    }
}
