//! Structural equality checker for container graphs.
//!
//! Recursively compares two containers believed to represent the same
//! recording (typically pre- and post- round-trip through re-encoding) and
//! reports every discrepancy instead of halting on the first one. Nothing
//! in here raises on a mismatch: the checker's job is exhaustive
//! reporting, not gatekeeping. The walk is driven by the explicit field
//! schema each node declares through
//! [`ContainerNode::fields`](crate::model::ContainerNode::fields).
//!
//! Numeric values (scalar floats and numeric arrays) use an absolute plus
//! relative tolerance with NaN treated as equal to NaN; text and bytes can
//! optionally be treated as equivalent, since some storage backends
//! round-trip text as bytes.

use std::collections::BTreeSet;

use crate::model::{ArrayData, ContainerNode, FieldValue};

/// Knobs for one comparison run.
#[derive(Debug, Clone)]
pub struct CompareOptions {
    /// Skip comparing the name of the two top-level containers.
    pub ignore_name: bool,
    /// Skip comparing opaque identity markers. A re-encoded copy
    /// legitimately gets fresh markers.
    pub ignore_object_ids: bool,
    /// Treat encoded byte-strings and text strings as equivalent.
    pub string_bytes_equivalent: bool,
    pub abs_tol: f64,
    pub rel_tol: f64,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            ignore_name: false,
            ignore_object_ids: false,
            string_bytes_equivalent: false,
            abs_tol: 1e-8,
            rel_tol: 1e-5,
        }
    }
}

/// One reported mismatch: where it was found and what differed.
#[derive(Debug, Clone, PartialEq)]
pub struct Discrepancy {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Compare two container graphs and collect every discrepancy.
pub fn compare_containers(
    left: &dyn ContainerNode,
    right: &dyn ContainerNode,
    options: &CompareOptions,
) -> Vec<Discrepancy> {
    let mut checker = Checker {
        options,
        out: Vec::new(),
    };
    checker.node("", left, right, !options.ignore_name);
    checker.out
}

struct Checker<'a> {
    options: &'a CompareOptions,
    out: Vec<Discrepancy>,
}

impl Checker<'_> {
    fn report(&mut self, path: &str, message: String) {
        self.out.push(Discrepancy {
            path: path.to_string(),
            message,
        });
    }

    fn node(
        &mut self,
        path: &str,
        left: &dyn ContainerNode,
        right: &dyn ContainerNode,
        check_name: bool,
    ) {
        if left.type_name() != right.type_name() {
            self.report(
                path,
                format!(
                    "container types do not match: {} != {}",
                    left.type_name(),
                    right.type_name()
                ),
            );
            return;
        }
        if check_name && left.name() != right.name() {
            self.report(
                path,
                format!("names do not match: '{}' != '{}'", left.name(), right.name()),
            );
        }
        if !self.options.ignore_object_ids && left.object_id() != right.object_id() {
            self.report(
                path,
                format!(
                    "object IDs do not match: {} != {}",
                    left.object_id(),
                    right.object_id()
                ),
            );
        }

        let left_fields = left.fields();
        let right_fields = right.fields();
        for (name, left_value) in &left_fields {
            let field_path = join(path, name);
            match right_fields.iter().find(|(n, _)| n == name) {
                Some((_, right_value)) => self.field(&field_path, left_value, right_value),
                None => self.report(&field_path, "field missing on right side".to_string()),
            }
        }
        for (name, _) in &right_fields {
            if !left_fields.iter().any(|(n, _)| n == name) {
                self.report(&join(path, name), "field missing on left side".to_string());
            }
        }
    }

    fn field(&mut self, path: &str, left: &FieldValue<'_>, right: &FieldValue<'_>) {
        use FieldValue::*;
        match (left, right) {
            (Text(a), Text(b)) => {
                if a != b {
                    self.report(path, format!("values do not match: {a:?} != {b:?}"));
                }
            }
            (Int(a), Int(b)) => {
                if a != b {
                    self.report(path, format!("values do not match: {a:?} != {b:?}"));
                }
            }
            (Time(a), Time(b)) => {
                if a != b {
                    self.report(path, format!("values do not match: {a:?} != {b:?}"));
                }
            }
            (Float(a), Float(b)) => match (a, b) {
                (Some(x), Some(y)) => {
                    if !self.close(*x, *y) {
                        self.report(path, format!("float values not close: {x} != {y}"));
                    }
                }
                (None, None) => {}
                _ => self.report(path, format!("values do not match: {a:?} != {b:?}")),
            },
            (Array(a), Array(b)) => self.array(path, a, b),
            (IndexArray(a), IndexArray(b)) => {
                if a != b {
                    self.report(path, format!("index lists do not match: {a:?} != {b:?}"));
                }
            }
            (IntArray(a), IntArray(b)) => {
                if a != b {
                    self.report(path, "integer arrays not equal".to_string());
                }
            }
            (TextArray(a), TextArray(b)) => {
                if a != b {
                    self.report(path, "text arrays not equal".to_string());
                }
            }
            (FloatArray(a), FloatArray(b)) => {
                if !self.float_slices_close(a, b) {
                    self.report(path, "numeric arrays not close".to_string());
                }
            }
            (Columns(a), Columns(b)) => {
                let a_keys: BTreeSet<&String> = a.keys().collect();
                let b_keys: BTreeSet<&String> = b.keys().collect();
                if a_keys != b_keys {
                    self.report(
                        path,
                        format!("column keys do not match: {a_keys:?} != {b_keys:?}"),
                    );
                }
                for key in a_keys.intersection(&b_keys) {
                    let col_path = join(path, key);
                    let (ca, cb) = (&a[key.as_str()], &b[key.as_str()]);
                    if ca.description != cb.description {
                        self.report(
                            &col_path,
                            format!(
                                "values do not match: {:?} != {:?}",
                                ca.description, cb.description
                            ),
                        );
                    }
                    self.array(&col_path, &ca.data, &cb.data);
                }
            }
            (JsonMap(a), JsonMap(b)) => {
                let a_keys: BTreeSet<&String> = a.keys().collect();
                let b_keys: BTreeSet<&String> = b.keys().collect();
                if a_keys != b_keys {
                    self.report(
                        path,
                        format!("attribute keys do not match: {a_keys:?} != {b_keys:?}"),
                    );
                }
                for key in a_keys.intersection(&b_keys) {
                    if a[key.as_str()] != b[key.as_str()] {
                        self.report(
                            &join(path, key),
                            format!(
                                "values do not match: {} != {}",
                                a[key.as_str()],
                                b[key.as_str()]
                            ),
                        );
                    }
                }
            }
            (Child(a), Child(b)) => self.node(path, *a, *b, true),
            (OptChild(a), OptChild(b)) => match (a, b) {
                (Some(a), Some(b)) => self.node(path, *a, *b, true),
                (None, None) => {}
                _ => self.report(path, "presence of optional child differs".to_string()),
            },
            (ChildMap(a), ChildMap(b)) => {
                let a_keys: BTreeSet<&str> = a.iter().map(|(k, _)| *k).collect();
                let b_keys: BTreeSet<&str> = b.iter().map(|(k, _)| *k).collect();
                if a_keys != b_keys {
                    self.report(
                        path,
                        format!("dict keys do not match: {a_keys:?} != {b_keys:?}"),
                    );
                }
                for key in a_keys.intersection(&b_keys) {
                    let left_child = a.iter().find(|(k, _)| k == key).map(|(_, c)| *c);
                    let right_child = b.iter().find(|(k, _)| k == key).map(|(_, c)| *c);
                    if let (Some(left_child), Some(right_child)) = (left_child, right_child) {
                        self.node(&join(path, key), left_child, right_child, true);
                    }
                }
            }
            _ => self.report(path, "field shapes do not match".to_string()),
        }
    }

    fn array(&mut self, path: &str, left: &ArrayData, right: &ArrayData) {
        use ArrayData::*;
        if left.len() != right.len() {
            self.report(
                path,
                format!("array lengths do not match: {} != {}", left.len(), right.len()),
            );
            return;
        }
        match (left, right) {
            (F64(a), F64(b)) => {
                if !self.float_slices_close(a, b) {
                    self.report(path, "numeric arrays not close".to_string());
                }
            }
            (I64(a), I64(b)) => {
                if a != b {
                    self.report(path, "integer arrays not equal".to_string());
                }
            }
            // Mixed numeric dtypes can come out of a re-encode; compare
            // the values, not the storage type.
            (F64(a), I64(b)) | (I64(b), F64(a)) => {
                let widened: Vec<f64> = b.iter().map(|&v| v as f64).collect();
                if !self.float_slices_close(a, &widened) {
                    self.report(path, "numeric arrays not close".to_string());
                }
            }
            (Text(a), Text(b)) => {
                if a != b {
                    self.report(path, "text arrays not equal".to_string());
                }
            }
            (Bytes(a), Bytes(b)) => {
                if a != b {
                    self.report(path, "byte arrays not equal".to_string());
                }
            }
            (Text(a), Bytes(b)) | (Bytes(b), Text(a)) if self.options.string_bytes_equivalent => {
                let decoded: Vec<String> = b
                    .iter()
                    .map(|raw| String::from_utf8_lossy(raw).into_owned())
                    .collect();
                if *a != decoded {
                    self.report(path, "text and byte arrays not equal".to_string());
                }
            }
            _ => self.report(path, "array dtypes do not match".to_string()),
        }
    }

    fn close(&self, a: f64, b: f64) -> bool {
        if a.is_nan() && b.is_nan() {
            return true;
        }
        (a - b).abs() <= self.options.abs_tol + self.options.rel_tol * b.abs()
    }

    fn float_slices_close(&self, a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.close(*x, *y))
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::{DateTime, FixedOffset, TimeZone};
    use uuid::Uuid;

    fn start_time() -> DateTime<FixedOffset> {
        FixedOffset::west_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2019, 1, 8, 14, 30, 0)
            .unwrap()
    }

    fn sample_container() -> Container {
        let mut container = Container::new("session_715093703", start_time());
        container.session_description = "ecephys session".into();
        container
            .devices
            .insert("probeA".into(), Device::new("probeA"));
        container.electrodes.push_row(850249267, "probeA", "VISp", "high pass");
        container.electrodes.push_row(850249269, "probeA", "VISl", "high pass");
        container.acquisition.insert(
            "raw_running_wheel_rotation".into(),
            Acquisition::TimeSeries(TimeSeries {
                object_id: Uuid::new_v4(),
                name: "raw_running_wheel_rotation".into(),
                description: None,
                unit: Some("radians".into()),
                data: ArrayData::F64(vec![0.0, 0.1, 0.2, f64::NAN]),
                timestamps: Some(vec![0.0, 0.5, 1.0, 1.5]),
                starting_time: None,
                rate: None,
            }),
        );
        let mut trials = DynamicTable::new("trials");
        trials.columns.insert(
            "reward_volume".into(),
            VectorColumn {
                description: Some("water dispensed".into()),
                data: ArrayData::F64(vec![0.007, 0.0, 0.007]),
            },
        );
        container.intervals.insert("trials".into(), trials);
        container
    }

    #[test]
    fn deep_copy_has_no_discrepancies() {
        let container = sample_container();
        let copy = container.clone();
        let found = compare_containers(&container, &copy, &CompareOptions::default());
        assert!(found.is_empty(), "unexpected discrepancies: {found:?}");
    }

    #[test]
    fn re_encoded_copy_passes_with_ids_ignored() {
        let container = sample_container();
        let mut copy = container.clone();
        copy.object_id = Uuid::new_v4();
        let options = CompareOptions {
            ignore_object_ids: true,
            ..CompareOptions::default()
        };
        assert!(compare_containers(&container, &copy, &options).is_empty());
    }

    #[test]
    fn single_mutated_array_element_reports_one_discrepancy() {
        let container = sample_container();
        let mut copy = container.clone();
        if let Some(Acquisition::TimeSeries(series)) =
            copy.acquisition.get_mut("raw_running_wheel_rotation")
        {
            if let ArrayData::F64(values) = &mut series.data {
                values[1] += 1.0;
            }
        }
        let found = compare_containers(&container, &copy, &CompareOptions::default());
        assert_eq!(found.len(), 1, "expected exactly one discrepancy: {found:?}");
        assert_eq!(
            found[0].path,
            "acquisition/raw_running_wheel_rotation/data"
        );
    }

    #[test]
    fn nan_equals_nan() {
        let container = sample_container();
        let copy = container.clone();
        assert!(compare_containers(&container, &copy, &CompareOptions::default()).is_empty());
    }

    #[test]
    fn mismatched_key_sets_report_without_crashing() {
        let container = sample_container();
        let mut copy = container.clone();
        copy.devices.insert("probeB".into(), Device::new("probeB"));
        let found = compare_containers(&container, &copy, &CompareOptions::default());
        assert_eq!(found.len(), 1);
        assert!(found[0].message.contains("probeB"));
        assert_eq!(found[0].path, "devices");
    }

    #[test]
    fn ignore_name_applies_to_top_level_only() {
        let container = sample_container();
        let mut copy = container.clone();
        copy.identifier = "session_renamed".into();
        let options = CompareOptions {
            ignore_name: true,
            ..CompareOptions::default()
        };
        // identifier is still a declared field, so it is reported there,
        // but not a second time as a name mismatch.
        let found = compare_containers(&container, &copy, &options);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "identifier");
    }

    #[test]
    fn text_bytes_equivalence_is_opt_in() {
        let text = ArrayData::Text(vec!["VISp".into()]);
        let bytes = ArrayData::Bytes(vec![b"VISp".to_vec()]);

        let strict = CompareOptions::default();
        let mut checker = Checker {
            options: &strict,
            out: Vec::new(),
        };
        checker.array("col", &text, &bytes);
        assert_eq!(checker.out.len(), 1);

        let lenient = CompareOptions {
            string_bytes_equivalent: true,
            ..CompareOptions::default()
        };
        let mut checker = Checker {
            options: &lenient,
            out: Vec::new(),
        };
        checker.array("col", &text, &bytes);
        assert!(checker.out.is_empty());
    }

    #[test]
    fn tolerance_is_absolute_plus_relative() {
        let options = CompareOptions::default();
        let checker = Checker {
            options: &options,
            out: Vec::new(),
        };
        assert!(checker.close(1.0, 1.0 + 5e-6));
        assert!(!checker.close(1.0, 1.1));
    }
}
