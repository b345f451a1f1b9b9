/// Output of the grouping engine: group identifiers and the group mapping
/// handed to the labeling step.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::SeraphineError;
use crate::perception::types::{impl_string_serde, BBox, MergedId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// A row: members share a horizontal band.
    Horizontal,
    /// A column: members share a vertical band.
    Vertical,
}

impl GroupKind {
    fn prefix(self) -> char {
        match self {
            GroupKind::Horizontal => 'H',
            GroupKind::Vertical => 'V',
        }
    }
}

/// `H{row}_{position}` or `V{column}_{position}`, both 1-based.
///
/// Only stable within one run: the same screen captured twice can number
/// its rows differently, but a fixed input always yields the same ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId {
    pub kind: GroupKind,
    /// Row index for H groups, column index for V groups.
    pub major: u32,
    /// Position within that row or column.
    pub minor: u32,
}

impl GroupId {
    pub fn horizontal(row: u32, position: u32) -> Self {
        Self { kind: GroupKind::Horizontal, major: row, minor: position }
    }

    pub fn vertical(column: u32, position: u32) -> Self {
        Self { kind: GroupKind::Vertical, major: column, minor: position }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}_{}", self.kind.prefix(), self.major, self.minor)
    }
}

fn group_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([HV])(\d{1,10})_(\d{1,10})$").expect("group id pattern is valid")
    })
}

impl FromStr for GroupId {
    type Err = SeraphineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SeraphineError::InvalidId(s.to_string());
        let caps = group_id_pattern().captures(s.trim()).ok_or_else(invalid)?;
        let kind = match &caps[1] {
            "H" => GroupKind::Horizontal,
            _ => GroupKind::Vertical,
        };
        let major = caps[2].parse().map_err(|_| invalid())?;
        let minor = caps[3].parse().map_err(|_| invalid())?;
        Ok(GroupId { kind, major, minor })
    }
}

impl_string_serde!(GroupId);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub bbox: BBox,
    /// Left-to-right for rows, top-to-bottom for columns.
    pub member_ids: Vec<MergedId>,
    /// Free-text annotation attached by the labeling step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Group {
    pub fn len(&self) -> usize {
        self.member_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }
}

/// `{group_id: {bbox, member_ids}}`, iterated and serialized in id order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupLayout {
    groups: BTreeMap<GroupId, Group>,
}

impl GroupLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, id: GroupId, group: Group) {
        self.groups.insert(id, group);
    }

    pub fn get(&self, id: &GroupId) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupId, &Group)> {
        self.groups.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &GroupId> {
        self.groups.keys()
    }

    /// The group a merged detection belongs to.
    pub fn group_of(&self, member: MergedId) -> Option<GroupId> {
        self.groups
            .iter()
            .find(|(_, g)| g.member_ids.contains(&member))
            .map(|(id, _)| *id)
    }

    /// Attach labeler annotations. Only the `label` field changes; ids that
    /// are not in the layout are ignored. Returns how many were attached.
    pub fn attach_labels(&mut self, labels: BTreeMap<GroupId, String>) -> usize {
        let mut attached = 0;
        for (id, label) in labels {
            match self.groups.get_mut(&id) {
                Some(group) => {
                    group.label = Some(label);
                    attached += 1;
                }
                None => {
                    tracing::warn!(group_id = %id, "label for unknown group ignored");
                }
            }
        }
        attached
    }
}

/// Summary counts produced alongside a layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingAnalysis {
    pub total_groups: usize,
    pub horizontal_groups: usize,
    pub vertical_groups: usize,
    pub singleton_groups: usize,
    /// Row candidates found by the top-to-bottom sweep.
    pub rows: usize,
    pub largest_group: usize,
    pub grouped_detections: usize,
}

impl GroupingAnalysis {
    pub fn from_layout(layout: &GroupLayout, rows: usize) -> Self {
        let mut analysis = GroupingAnalysis { rows, ..Default::default() };
        for (id, group) in layout.iter() {
            analysis.total_groups += 1;
            match id.kind {
                GroupKind::Horizontal => analysis.horizontal_groups += 1,
                GroupKind::Vertical => analysis.vertical_groups += 1,
            }
            if group.len() == 1 {
                analysis.singleton_groups += 1;
            }
            analysis.largest_group = analysis.largest_group.max(group.len());
            analysis.grouped_detections += group.len();
        }
        analysis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(members: &[u32]) -> Group {
        Group {
            bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
            member_ids: members.iter().map(|&n| MergedId(n)).collect(),
            label: None,
        }
    }

    #[test]
    fn group_id_round_trips_through_text() {
        let id: GroupId = "V3_12".parse().unwrap();
        assert_eq!(id, GroupId::vertical(3, 12));
        assert_eq!(id.to_string(), "V3_12");
        assert!("H1".parse::<GroupId>().is_err());
        assert!("X1_1".parse::<GroupId>().is_err());

        let wide = GroupId::horizontal(u32::MAX, 1_000_000_000);
        assert_eq!(wide.to_string().parse::<GroupId>().unwrap(), wide);
    }

    #[test]
    fn ordering_is_kind_then_numeric() {
        let mut ids = vec![
            GroupId::vertical(1, 1),
            GroupId::horizontal(10, 1),
            GroupId::horizontal(2, 3),
            GroupId::horizontal(2, 1),
        ];
        ids.sort();
        let rendered: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["H2_1", "H2_3", "H10_1", "V1_1"]);
    }

    #[test]
    fn serializes_as_group_mapping() {
        let mut layout = GroupLayout::new();
        layout.insert(GroupId::horizontal(1, 1), group(&[1, 2]));
        let json = serde_json::to_value(&layout).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "H1_1": { "bbox": [0.0, 0.0, 10.0, 10.0], "member_ids": ["M001", "M002"] }
            })
        );
        let back: GroupLayout = serde_json::from_value(json).unwrap();
        assert_eq!(back, layout);
    }

    #[test]
    fn labels_attach_without_touching_geometry() {
        let mut layout = GroupLayout::new();
        layout.insert(GroupId::horizontal(1, 1), group(&[1, 2]));
        let before = layout.get(&GroupId::horizontal(1, 1)).cloned().unwrap();

        let mut labels = BTreeMap::new();
        labels.insert(GroupId::horizontal(1, 1), "toolbar".to_string());
        labels.insert(GroupId::vertical(9, 9), "ghost".to_string());
        assert_eq!(layout.attach_labels(labels), 1);

        let after = layout.get(&GroupId::horizontal(1, 1)).unwrap();
        assert_eq!(after.label.as_deref(), Some("toolbar"));
        assert_eq!(after.bbox, before.bbox);
        assert_eq!(after.member_ids, before.member_ids);
        assert_eq!(layout.len(), 1);
    }

    #[test]
    fn group_of_finds_owner() {
        let mut layout = GroupLayout::new();
        layout.insert(GroupId::horizontal(1, 1), group(&[1, 2]));
        layout.insert(GroupId::vertical(1, 1), group(&[3, 4]));
        assert_eq!(layout.group_of(MergedId(4)), Some(GroupId::vertical(1, 1)));
        assert_eq!(layout.group_of(MergedId(5)), None);
    }

    #[test]
    fn analysis_counts_kinds_and_singletons() {
        let mut layout = GroupLayout::new();
        layout.insert(GroupId::horizontal(1, 1), group(&[1, 2, 3]));
        layout.insert(GroupId::horizontal(2, 1), group(&[4]));
        layout.insert(GroupId::vertical(1, 1), group(&[5, 6]));
        let analysis = GroupingAnalysis::from_layout(&layout, 4);
        assert_eq!(analysis.total_groups, 3);
        assert_eq!(analysis.horizontal_groups, 2);
        assert_eq!(analysis.vertical_groups, 1);
        assert_eq!(analysis.singleton_groups, 1);
        assert_eq!(analysis.largest_group, 3);
        assert_eq!(analysis.grouped_detections, 6);
        assert_eq!(analysis.rows, 4);
    }
}
