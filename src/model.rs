//! In-memory container model.
//!
//! This is the abstract graph of one hierarchical scientific-recording
//! container: the session root plus its named devices, electrode table,
//! imaging planes, processing modules, acquisitions, interval tables and
//! lab metadata. The physical encodings (chunked binary, cloud chunked
//! array) stay behind the `codec` module; everything in here is plain
//! owned data that serializes with serde.
//!
//! Two crate-wide conventions live here:
//!
//! - **Explicit field schema.** Instead of reflection, every node type
//!   implements [`ContainerNode`] and enumerates its declared fields as
//!   tagged [`FieldValue`] variants. The structural equality checker walks
//!   this schema; the identity manager uses it to register every object in
//!   a tree.
//! - **Builder-style renaming.** Sub-objects are never renamed in place.
//!   The `renamed`/`with_device`/`with_region` helpers consume the old
//!   value and return a fresh one carrying the new name or target, which
//!   keeps every merge step auditable as a pure transformation. Renames
//!   are idempotent: applying the same canonical name twice yields the
//!   same result.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::error::{RepackError, Result};

/// Array payload of a dataset. Numeric variants get tolerance-based
/// comparison; text and bytes are exact (modulo the string/bytes
/// equivalence option of the equality checker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    F64(Vec<f64>),
    I64(Vec<i64>),
    Text(Vec<String>),
    Bytes(Vec<Vec<u8>>),
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            ArrayData::F64(v) => v.len(),
            ArrayData::I64(v) => v.len(),
            ArrayData::Text(v) => v.len(),
            ArrayData::Bytes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            ArrayData::F64(v) => Some(v),
            _ => None,
        }
    }
}

/// One declared field of a container node, tagged by shape.
///
/// `Child` and `ChildMap` recurse into the container comparator;
/// everything else is a leaf.
pub enum FieldValue<'a> {
    Text(Option<&'a str>),
    Float(Option<f64>),
    Int(Option<i64>),
    Time(Option<DateTime<FixedOffset>>),
    Array(&'a ArrayData),
    IndexArray(&'a [usize]),
    FloatArray(&'a [f64]),
    IntArray(&'a [i64]),
    TextArray(&'a [String]),
    /// Named columns of a dynamic table; key sets are compared first.
    Columns(&'a BTreeMap<String, VectorColumn>),
    /// Free-form attribute map; compared by key set, then exact equality.
    JsonMap(&'a BTreeMap<String, serde_json::Value>),
    Child(&'a dyn ContainerNode),
    OptChild(Option<&'a dyn ContainerNode>),
    ChildMap(Vec<(&'a str, &'a dyn ContainerNode)>),
}

/// A node of the container graph with an explicit field schema.
pub trait ContainerNode {
    /// Declared type of the node, compared before any field.
    fn type_name(&self) -> &'static str;
    /// Addressing name within the parent collection.
    fn name(&self) -> &str;
    /// Opaque identity marker. A re-encoded copy may legitimately carry
    /// new markers, so the equality checker can be told to ignore them.
    fn object_id(&self) -> Uuid;
    /// Declared fields in schema order.
    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)>;
}

fn child_map<'a, T: ContainerNode>(map: &'a BTreeMap<String, T>) -> FieldValue<'a> {
    FieldValue::ChildMap(
        map.iter()
            .map(|(k, v)| (k.as_str(), v as &dyn ContainerNode))
            .collect(),
    )
}

/// Insert a named sub-object into a collection, refusing to overwrite.
/// Name collisions during a merge must be resolved by rename upstream,
/// never silently here.
pub fn insert_unique<T: ContainerNode>(
    map: &mut BTreeMap<String, T>,
    value: T,
    collection: &str,
) -> Result<()> {
    let name = value.name().to_string();
    if map.contains_key(&name) {
        return Err(RepackError::Precondition(format!(
            "name '{name}' already present in {collection}"
        )));
    }
    map.insert(name, value);
    Ok(())
}

/// Root of one recording container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub object_id: Uuid,
    pub identifier: String,
    pub session_id: Option<String>,
    pub session_description: String,
    pub session_start_time: DateTime<FixedOffset>,
    pub timestamps_reference_time: DateTime<FixedOffset>,
    pub stimulus_notes: Option<String>,
    pub subject: Option<SubjectInfo>,
    pub devices: BTreeMap<String, Device>,
    pub electrodes: ElectrodeTable,
    pub imaging_planes: BTreeMap<String, ImagingPlane>,
    pub processing: BTreeMap<String, ProcessingModule>,
    pub acquisition: BTreeMap<String, Acquisition>,
    pub intervals: BTreeMap<String, DynamicTable>,
    pub lab_meta_data: BTreeMap<String, LabMetadata>,
    pub units: Option<DynamicTable>,
}

impl Container {
    pub fn new(identifier: &str, start_time: DateTime<FixedOffset>) -> Self {
        Self {
            object_id: Uuid::new_v4(),
            identifier: identifier.to_string(),
            session_id: None,
            session_description: String::new(),
            session_start_time: start_time,
            timestamps_reference_time: start_time,
            stimulus_notes: None,
            subject: None,
            devices: BTreeMap::new(),
            electrodes: ElectrodeTable::default(),
            imaging_planes: BTreeMap::new(),
            processing: BTreeMap::new(),
            acquisition: BTreeMap::new(),
            intervals: BTreeMap::new(),
            lab_meta_data: BTreeMap::new(),
            units: None,
        }
    }

    /// The trials table, when the container carries one.
    pub fn trials(&self) -> Option<&DynamicTable> {
        self.intervals.get("trials")
    }
}

impl ContainerNode for Container {
    fn type_name(&self) -> &'static str {
        "Container"
    }

    fn name(&self) -> &str {
        &self.identifier
    }

    fn object_id(&self) -> Uuid {
        self.object_id
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![
            ("identifier", FieldValue::Text(Some(&self.identifier))),
            ("session_id", FieldValue::Text(self.session_id.as_deref())),
            (
                "session_description",
                FieldValue::Text(Some(&self.session_description)),
            ),
            (
                "session_start_time",
                FieldValue::Time(Some(self.session_start_time)),
            ),
            (
                "timestamps_reference_time",
                FieldValue::Time(Some(self.timestamps_reference_time)),
            ),
            (
                "stimulus_notes",
                FieldValue::Text(self.stimulus_notes.as_deref()),
            ),
            (
                "subject",
                FieldValue::OptChild(self.subject.as_ref().map(|s| s as &dyn ContainerNode)),
            ),
            ("devices", child_map(&self.devices)),
            ("electrodes", FieldValue::Child(&self.electrodes)),
            ("imaging_planes", child_map(&self.imaging_planes)),
            ("processing", child_map(&self.processing)),
            ("acquisition", child_map(&self.acquisition)),
            ("intervals", child_map(&self.intervals)),
            ("lab_meta_data", child_map(&self.lab_meta_data)),
            (
                "units",
                FieldValue::OptChild(self.units.as_ref().map(|u| u as &dyn ContainerNode)),
            ),
        ]
    }
}

/// Subject facts embedded in a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub object_id: Uuid,
    pub subject_id: String,
    pub species: String,
    /// Single-letter sex code, "F" or "M".
    pub sex: String,
    /// Age duration string of the fixed form "P{days}D".
    pub age: String,
    pub genotype: String,
    pub strain: Option<String>,
    pub description: Option<String>,
}

impl ContainerNode for SubjectInfo {
    fn type_name(&self) -> &'static str {
        "Subject"
    }

    fn name(&self) -> &str {
        "subject"
    }

    fn object_id(&self) -> Uuid {
        self.object_id
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![
            ("subject_id", FieldValue::Text(Some(&self.subject_id))),
            ("species", FieldValue::Text(Some(&self.species))),
            ("sex", FieldValue::Text(Some(&self.sex))),
            ("age", FieldValue::Text(Some(&self.age))),
            ("genotype", FieldValue::Text(Some(&self.genotype))),
            ("strain", FieldValue::Text(self.strain.as_deref())),
            ("description", FieldValue::Text(self.description.as_deref())),
        ]
    }
}

/// A recording or imaging device shared by reference across the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub object_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
}

impl Device {
    pub fn new(name: &str) -> Self {
        Self {
            object_id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            manufacturer: None,
        }
    }
}

impl ContainerNode for Device {
    fn type_name(&self) -> &'static str {
        "Device"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn object_id(&self) -> Uuid {
        self.object_id
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![
            ("description", FieldValue::Text(self.description.as_deref())),
            (
                "manufacturer",
                FieldValue::Text(self.manufacturer.as_deref()),
            ),
        ]
    }
}

/// Session-wide electrode catalog, stored columnar. Row `i` describes the
/// electrode with stable numeric ID `ids[i]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectrodeTable {
    #[serde(default = "Uuid::new_v4")]
    pub object_id: Uuid,
    pub ids: Vec<i64>,
    pub group_names: Vec<String>,
    pub locations: Vec<String>,
    pub filtering: Vec<String>,
}

impl Default for ElectrodeTable {
    fn default() -> Self {
        Self {
            object_id: Uuid::new_v4(),
            ids: Vec::new(),
            group_names: Vec::new(),
            locations: Vec::new(),
            filtering: Vec::new(),
        }
    }
}

impl ElectrodeTable {
    pub fn push_row(&mut self, id: i64, group_name: &str, location: &str, filtering: &str) {
        self.ids.push(id);
        self.group_names.push(group_name.to_string());
        self.locations.push(location.to_string());
        self.filtering.push(filtering.to_string());
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl ContainerNode for ElectrodeTable {
    fn type_name(&self) -> &'static str {
        "ElectrodeTable"
    }

    fn name(&self) -> &str {
        "electrodes"
    }

    fn object_id(&self) -> Uuid {
        self.object_id
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![
            ("id", FieldValue::IntArray(&self.ids)),
            ("group_name", FieldValue::TextArray(&self.group_names)),
            ("location", FieldValue::TextArray(&self.locations)),
            ("filtering", FieldValue::TextArray(&self.filtering)),
        ]
    }
}

/// An ordered sequence of row indices into an [`ElectrodeTable`].
///
/// Indices are only meaningful relative to the table the region was built
/// against; moving a series to a container with a different table requires
/// rewriting every index through the reference resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectrodeTableRegion {
    pub object_id: Uuid,
    pub description: String,
    pub indices: Vec<usize>,
}

impl ElectrodeTableRegion {
    pub fn new(description: &str, indices: Vec<usize>) -> Self {
        Self {
            object_id: Uuid::new_v4(),
            description: description.to_string(),
            indices,
        }
    }
}

impl ContainerNode for ElectrodeTableRegion {
    fn type_name(&self) -> &'static str {
        "ElectrodeTableRegion"
    }

    fn name(&self) -> &str {
        "electrodes"
    }

    fn object_id(&self) -> Uuid {
        self.object_id
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![
            ("description", FieldValue::Text(Some(&self.description))),
            ("data", FieldValue::IndexArray(&self.indices)),
        ]
    }
}

/// A plain sampled signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    pub object_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub data: ArrayData,
    pub timestamps: Option<Vec<f64>>,
    pub starting_time: Option<f64>,
    pub rate: Option<f64>,
}

impl TimeSeries {
    /// Time of the first sample, in seconds from the session start.
    pub fn first_time(&self) -> Option<f64> {
        if let Some(ts) = self.timestamps.as_ref().filter(|ts| !ts.is_empty()) {
            return ts.first().copied();
        }
        self.starting_time
    }

    /// Time of the last sample, in seconds from the session start.
    pub fn last_time(&self) -> Option<f64> {
        if let Some(ts) = self.timestamps.as_ref().filter(|ts| !ts.is_empty()) {
            return ts.last().copied();
        }
        match (self.starting_time, self.rate) {
            (Some(start), Some(rate)) if rate > 0.0 => {
                Some(start + self.data.len() as f64 / rate)
            }
            _ => None,
        }
    }
}

impl ContainerNode for TimeSeries {
    fn type_name(&self) -> &'static str {
        "TimeSeries"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn object_id(&self) -> Uuid {
        self.object_id
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        let mut fields = vec![
            ("description", FieldValue::Text(self.description.as_deref())),
            ("unit", FieldValue::Text(self.unit.as_deref())),
            ("data", FieldValue::Array(&self.data)),
            ("starting_time", FieldValue::Float(self.starting_time)),
            ("rate", FieldValue::Float(self.rate)),
        ];
        if let Some(ts) = &self.timestamps {
            fields.push(("timestamps", FieldValue::FloatArray(ts)));
        }
        fields
    }
}

/// A sampled signal tied to electrode table rows through a region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectricalSeries {
    pub object_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub data: ArrayData,
    pub timestamps: Option<Vec<f64>>,
    pub starting_time: Option<f64>,
    pub rate: Option<f64>,
    pub electrodes: ElectrodeTableRegion,
}

impl ElectricalSeries {
    /// Rebuild this series around a freshly resolved electrode region.
    pub fn with_region(mut self, region: ElectrodeTableRegion) -> Self {
        self.electrodes = region;
        self
    }

    pub fn first_time(&self) -> Option<f64> {
        if let Some(ts) = self.timestamps.as_ref().filter(|ts| !ts.is_empty()) {
            return ts.first().copied();
        }
        self.starting_time
    }

    pub fn last_time(&self) -> Option<f64> {
        if let Some(ts) = self.timestamps.as_ref().filter(|ts| !ts.is_empty()) {
            return ts.last().copied();
        }
        match (self.starting_time, self.rate) {
            (Some(start), Some(rate)) if rate > 0.0 => {
                Some(start + self.data.len() as f64 / rate)
            }
            _ => None,
        }
    }
}

impl ContainerNode for ElectricalSeries {
    fn type_name(&self) -> &'static str {
        "ElectricalSeries"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn object_id(&self) -> Uuid {
        self.object_id
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        let mut fields = vec![
            ("description", FieldValue::Text(self.description.as_deref())),
            ("data", FieldValue::Array(&self.data)),
            ("starting_time", FieldValue::Float(self.starting_time)),
            ("rate", FieldValue::Float(self.rate)),
            ("electrodes", FieldValue::Child(&self.electrodes)),
        ];
        if let Some(ts) = &self.timestamps {
            fields.push(("timestamps", FieldValue::FloatArray(ts)));
        }
        fields
    }
}

/// Named holder for the filtered electrical series of one probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lfp {
    pub object_id: Uuid,
    pub name: String,
    pub electrical_series: BTreeMap<String, ElectricalSeries>,
}

impl Lfp {
    pub fn new(name: &str) -> Self {
        Self {
            object_id: Uuid::new_v4(),
            name: name.to_string(),
            electrical_series: BTreeMap::new(),
        }
    }
}

impl ContainerNode for Lfp {
    fn type_name(&self) -> &'static str {
        "LFP"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn object_id(&self) -> Uuid {
        self.object_id
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![("electrical_series", child_map(&self.electrical_series))]
    }
}

/// Top-level acquisition object: a raw series or an LFP holder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Acquisition {
    TimeSeries(TimeSeries),
    Lfp(Lfp),
}

impl ContainerNode for Acquisition {
    fn type_name(&self) -> &'static str {
        match self {
            Acquisition::TimeSeries(s) => s.type_name(),
            Acquisition::Lfp(l) => l.type_name(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Acquisition::TimeSeries(s) => s.name(),
            Acquisition::Lfp(l) => l.name(),
        }
    }

    fn object_id(&self) -> Uuid {
        match self {
            Acquisition::TimeSeries(s) => s.object_id(),
            Acquisition::Lfp(l) => l.object_id(),
        }
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        match self {
            Acquisition::TimeSeries(s) => s.fields(),
            Acquisition::Lfp(l) => l.fields(),
        }
    }
}

/// One optical imaging field of view.
///
/// The description embeds the field-of-view dimensions, targeted structure
/// and depth in a fixed machine-parseable form; see
/// `extract::parse_plane_description`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagingPlane {
    pub object_id: Uuid,
    pub name: String,
    pub description: String,
    pub indicator: String,
    pub excitation_lambda: f64,
    pub imaging_rate: f64,
    pub location: String,
    /// Shared reference to a device owned by the containing file.
    pub device_name: String,
    pub device_id: Uuid,
}

impl ImagingPlane {
    pub fn renamed(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Retarget the device reference at another container's device.
    pub fn with_device(mut self, device: &Device) -> Self {
        self.device_name = device.name.clone();
        self.device_id = device.object_id;
        self
    }
}

impl ContainerNode for ImagingPlane {
    fn type_name(&self) -> &'static str {
        "ImagingPlane"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn object_id(&self) -> Uuid {
        self.object_id
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![
            ("description", FieldValue::Text(Some(&self.description))),
            ("indicator", FieldValue::Text(Some(&self.indicator))),
            (
                "excitation_lambda",
                FieldValue::Float(Some(self.excitation_lambda)),
            ),
            ("imaging_rate", FieldValue::Float(Some(self.imaging_rate))),
            ("location", FieldValue::Text(Some(&self.location))),
            ("device", FieldValue::Text(Some(&self.device_name))),
        ]
    }
}

/// Rows of segmented regions-of-interest, each referencing one imaging
/// plane. After a plane is re-parented and renamed, the reference must be
/// rewritten; a dangling reference is a correctness bug.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneSegmentation {
    pub object_id: Uuid,
    pub name: String,
    pub description: String,
    pub imaging_plane_name: String,
    pub imaging_plane_id: Uuid,
    pub roi_ids: Vec<i64>,
}

impl PlaneSegmentation {
    /// Repoint the plane reference at a reattached plane object.
    pub fn with_imaging_plane(mut self, plane: &ImagingPlane) -> Self {
        self.imaging_plane_name = plane.name.clone();
        self.imaging_plane_id = plane.object_id;
        self
    }
}

impl ContainerNode for PlaneSegmentation {
    fn type_name(&self) -> &'static str {
        "PlaneSegmentation"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn object_id(&self) -> Uuid {
        self.object_id
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![
            ("description", FieldValue::Text(Some(&self.description))),
            (
                "imaging_plane",
                FieldValue::Text(Some(&self.imaging_plane_name)),
            ),
            ("id", FieldValue::IntArray(&self.roi_ids)),
        ]
    }
}

/// Holder for plane segmentation tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSegmentation {
    pub object_id: Uuid,
    pub name: String,
    pub plane_segmentations: BTreeMap<String, PlaneSegmentation>,
}

impl ContainerNode for ImageSegmentation {
    fn type_name(&self) -> &'static str {
        "ImageSegmentation"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn object_id(&self) -> Uuid {
        self.object_id
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![("plane_segmentations", child_map(&self.plane_segmentations))]
    }
}

/// Derived current-source-density result from one probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentSourceDensity {
    pub object_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub time_series: TimeSeries,
}

impl CurrentSourceDensity {
    pub fn renamed(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}

impl ContainerNode for CurrentSourceDensity {
    fn type_name(&self) -> &'static str {
        "CurrentSourceDensity"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn object_id(&self) -> Uuid {
        self.object_id
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![
            ("description", FieldValue::Text(self.description.as_deref())),
            ("time_series", FieldValue::Child(&self.time_series)),
        ]
    }
}

/// One derived data object inside a processing module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DataInterface {
    Series(TimeSeries),
    Lfp(Lfp),
    Csd(CurrentSourceDensity),
    ImageSegmentation(ImageSegmentation),
    Table(DynamicTable),
}

impl ContainerNode for DataInterface {
    fn type_name(&self) -> &'static str {
        match self {
            DataInterface::Series(s) => s.type_name(),
            DataInterface::Lfp(l) => l.type_name(),
            DataInterface::Csd(c) => c.type_name(),
            DataInterface::ImageSegmentation(s) => s.type_name(),
            DataInterface::Table(t) => t.type_name(),
        }
    }

    fn name(&self) -> &str {
        match self {
            DataInterface::Series(s) => s.name(),
            DataInterface::Lfp(l) => l.name(),
            DataInterface::Csd(c) => c.name(),
            DataInterface::ImageSegmentation(s) => s.name(),
            DataInterface::Table(t) => t.name(),
        }
    }

    fn object_id(&self) -> Uuid {
        match self {
            DataInterface::Series(s) => s.object_id(),
            DataInterface::Lfp(l) => l.object_id(),
            DataInterface::Csd(c) => c.object_id(),
            DataInterface::ImageSegmentation(s) => s.object_id(),
            DataInterface::Table(t) => t.object_id(),
        }
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        match self {
            DataInterface::Series(s) => s.fields(),
            DataInterface::Lfp(l) => l.fields(),
            DataInterface::Csd(c) => c.fields(),
            DataInterface::ImageSegmentation(s) => s.fields(),
            DataInterface::Table(t) => t.fields(),
        }
    }
}

/// Named grouping of derived data objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingModule {
    pub object_id: Uuid,
    pub name: String,
    pub description: String,
    pub interfaces: BTreeMap<String, DataInterface>,
}

impl ProcessingModule {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            object_id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.to_string(),
            interfaces: BTreeMap::new(),
        }
    }

    pub fn renamed(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}

impl ContainerNode for ProcessingModule {
    fn type_name(&self) -> &'static str {
        "ProcessingModule"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn object_id(&self) -> Uuid {
        self.object_id
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![
            ("description", FieldValue::Text(Some(&self.description))),
            ("interfaces", child_map(&self.interfaces)),
        ]
    }
}

/// One column of a [`DynamicTable`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorColumn {
    pub description: Option<String>,
    pub data: ArrayData,
}

/// Generic row-aligned table (trials, stimulus presentations, units).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicTable {
    pub object_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub columns: BTreeMap<String, VectorColumn>,
}

impl DynamicTable {
    pub fn new(name: &str) -> Self {
        Self {
            object_id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            columns: BTreeMap::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ArrayData> {
        self.columns.get(name).map(|c| &c.data)
    }

    /// Row count, taken from the first column.
    pub fn len(&self) -> usize {
        self.columns.values().next().map_or(0, |c| c.data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContainerNode for DynamicTable {
    fn type_name(&self) -> &'static str {
        "DynamicTable"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn object_id(&self) -> Uuid {
        self.object_id
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![
            ("description", FieldValue::Text(self.description.as_deref())),
            ("columns", FieldValue::Columns(&self.columns)),
        ]
    }
}

/// Free-form per-file lab metadata object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabMetadata {
    pub object_id: Uuid,
    pub name: String,
    pub attrs: BTreeMap<String, serde_json::Value>,
}

impl LabMetadata {
    pub fn renamed(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}

impl ContainerNode for LabMetadata {
    fn type_name(&self) -> &'static str {
        "LabMetadata"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn object_id(&self) -> Uuid {
        self.object_id
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![("attrs", FieldValue::JsonMap(&self.attrs))]
    }
}

/// Tracks object identity across all containers opened for one merge.
///
/// Every container decoded for a merge registers its whole tree here, so
/// that an object moved from an auxiliary container into the base keeps a
/// single canonical identity. Registering the same marker from two
/// distinct objects is a fatal precondition failure; re-parenting an
/// already-tracked object is not a re-registration.
#[derive(Debug, Default)]
pub struct IdentityManager {
    seen: HashMap<Uuid, String>,
}

impl IdentityManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.seen.contains_key(&id)
    }

    /// Register one object. Duplicate markers are rejected.
    pub fn register(&mut self, id: Uuid, name: &str) -> Result<()> {
        if let Some(existing) = self.seen.insert(id, name.to_string()) {
            return Err(RepackError::Precondition(format!(
                "duplicate object identity {id}: '{existing}' and '{name}'"
            )));
        }
        Ok(())
    }

    /// Register a node and all of its declared children.
    pub fn register_tree(&mut self, node: &dyn ContainerNode) -> Result<()> {
        self.register(node.object_id(), node.name())?;
        for (_, value) in node.fields() {
            match value {
                FieldValue::Child(child) => self.register_tree(child)?,
                FieldValue::OptChild(Some(child)) => self.register_tree(child)?,
                FieldValue::ChildMap(children) => {
                    for (_, child) in children {
                        self.register_tree(child)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Collect the identity markers of a whole tree, erroring on duplicates.
/// Run by the encoder as a final integrity gate before serialization.
pub fn verify_unique_identities(root: &Container) -> Result<()> {
    let mut manager = IdentityManager::new();
    manager.register_tree(root)
}
