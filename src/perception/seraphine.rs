/// Seraphine: clusters merged detections into rows and columns.
///
/// 1. Rows: sweep top to bottom by vertical centre; a detection joins the
///    open row while its centre stays within a band derived from the row's
///    mean height.
/// 2. Row segments: inside a row, members are ordered left to right and the
///    row is cut wherever the horizontal gap exceeds a width-derived tolerance.
/// 3. Columns: segments of a single element are swept left to right by
///    horizontal centre into columns; a column cut by vertical gaps yields
///    runs, and every run of two or more becomes a vertical group.
/// 4. Ids: `H{row}_{pos}` for what is left of each row, `V{col}_{pos}` for
///    columns, 1-based in scan order.
///
/// Every tolerance is `max(mean_extent * ratio, min_tolerance_px)`, so
/// grouping does not depend on screen resolution and a degenerate (zero
/// extent) bucket falls back to the fixed minimum instead of collapsing.
/// All sorts are total orders with the merged id as final tie-break.
use std::cmp::Ordering;

use crate::config::GroupingConfig;
use crate::perception::layout::{Group, GroupId, GroupLayout, GroupingAnalysis};
use crate::perception::types::{BBox, MergedDetection};

#[derive(Debug, Clone, Default)]
pub struct GroupingOutcome {
    pub layout: GroupLayout,
    pub analysis: GroupingAnalysis,
}

type Members<'a> = Vec<&'a MergedDetection>;

/// A row candidate cut into left-to-right segments.
struct Row<'a> {
    segments: Vec<Members<'a>>,
}

/// Position of a single-element segment inside `rows`.
#[derive(Clone, Copy)]
struct SegmentRef {
    row: usize,
    segment: usize,
}

pub struct SeraphineGrouper {
    config: GroupingConfig,
}

impl SeraphineGrouper {
    pub fn new(config: GroupingConfig) -> Self {
        Self { config }
    }

    pub fn group(&self, merged: &[MergedDetection]) -> GroupingOutcome {
        if merged.is_empty() {
            return GroupingOutcome::default();
        }

        let candidates = self.form_rows(merged);
        let row_count = candidates.len();
        let mut rows: Vec<Row> = candidates
            .into_iter()
            .map(|members| Row { segments: self.split_row(members) })
            .collect();

        let mut layout = GroupLayout::new();

        if self.config.enable_vertical_groups {
            let columns = self.form_columns(&rows);
            let mut claimed: Vec<SegmentRef> = Vec::new();
            let mut column_index = 0u32;

            for column in columns {
                let runs: Vec<Vec<SegmentRef>> = self
                    .split_column(&rows, column)
                    .into_iter()
                    .filter(|run| run.len() >= 2)
                    .collect();
                if runs.is_empty() {
                    continue;
                }
                column_index += 1;
                for (pos, run) in runs.into_iter().enumerate() {
                    let members: Members =
                        run.iter().map(|r| rows[r.row].segments[r.segment][0]).collect();
                    if let Some(group) = make_group(&members) {
                        layout.insert(GroupId::vertical(column_index, pos as u32 + 1), group);
                    }
                    claimed.extend(run);
                }
            }

            // Claimed singletons leave their rows; empty segments are dropped below.
            for r in claimed {
                rows[r.row].segments[r.segment].clear();
            }
        }

        let mut row_index = 0u32;
        for row in &rows {
            let remaining: Vec<&Members> = row.segments.iter().filter(|s| !s.is_empty()).collect();
            if remaining.is_empty() {
                continue;
            }
            row_index += 1;
            for (pos, members) in remaining.into_iter().enumerate() {
                if let Some(group) = make_group(members) {
                    layout.insert(GroupId::horizontal(row_index, pos as u32 + 1), group);
                }
            }
        }

        let analysis = GroupingAnalysis::from_layout(&layout, row_count);
        tracing::debug!(
            rows = analysis.rows,
            groups = analysis.total_groups,
            horizontal = analysis.horizontal_groups,
            vertical = analysis.vertical_groups,
            singletons = analysis.singleton_groups,
            "seraphine grouping complete"
        );
        GroupingOutcome { layout, analysis }
    }

    fn tolerance(&self, mean_extent: Option<f64>, ratio: f64) -> f64 {
        let floor = self.config.min_tolerance_px;
        match mean_extent.map(|m| m * ratio) {
            Some(derived) if derived.is_finite() && derived > floor => derived,
            _ => floor,
        }
    }

    /// Phase 1: row candidates, top to bottom.
    fn form_rows<'a>(&self, merged: &'a [MergedDetection]) -> Vec<Members<'a>> {
        let mut sorted: Members = merged.iter().collect();
        sorted.sort_by(|a, b| by_key_then_id(a, b, |d| d.bbox.center_y()));

        let mut rows = Vec::new();
        let mut bucket: Members = Vec::new();
        let mut sum_center = 0.0;
        let mut sum_height = 0.0;

        for det in sorted {
            if !bucket.is_empty() {
                let n = bucket.len() as f64;
                let band = self.tolerance(Some(sum_height / n), self.config.row_band_ratio);
                if (det.bbox.center_y() - sum_center / n).abs() > band {
                    rows.push(std::mem::take(&mut bucket));
                    sum_center = 0.0;
                    sum_height = 0.0;
                }
            }
            sum_center += det.bbox.center_y();
            sum_height += det.bbox.height().max(0.0);
            bucket.push(det);
        }
        if !bucket.is_empty() {
            rows.push(bucket);
        }
        rows
    }

    /// Phase 2: cut a row where the horizontal gap is larger than the row's
    /// width-derived tolerance.
    fn split_row<'a>(&self, mut row: Members<'a>) -> Vec<Members<'a>> {
        row.sort_by(|a, b| by_key_then_id(a, b, |d| d.bbox.x_min));
        let gap_tolerance = self.tolerance(
            mean(row.iter().map(|d| d.bbox.width().max(0.0))),
            self.config.column_gap_ratio,
        );

        let mut segments = Vec::new();
        let mut current: Members = Vec::new();
        let mut right_edge = f64::NEG_INFINITY;
        for det in row {
            if !current.is_empty() && det.bbox.x_min - right_edge > gap_tolerance {
                segments.push(std::mem::take(&mut current));
                right_edge = f64::NEG_INFINITY;
            }
            right_edge = right_edge.max(det.bbox.x_max);
            current.push(det);
        }
        if !current.is_empty() {
            segments.push(current);
        }
        segments
    }

    /// Phase 3a: sweep isolated elements left to right into column buckets.
    fn form_columns(&self, rows: &[Row]) -> Vec<Vec<SegmentRef>> {
        let element = |r: &SegmentRef| rows[r.row].segments[r.segment][0];

        let mut singles: Vec<SegmentRef> = rows
            .iter()
            .enumerate()
            .flat_map(|(ri, row)| {
                row.segments
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.len() == 1)
                    .map(move |(si, _)| SegmentRef { row: ri, segment: si })
            })
            .collect();
        singles.sort_by(|a, b| by_key_then_id(element(a), element(b), |d| d.bbox.center_x()));

        let mut columns = Vec::new();
        let mut bucket: Vec<SegmentRef> = Vec::new();
        let mut sum_center = 0.0;
        let mut sum_width = 0.0;
        for r in singles {
            let det = element(&r);
            if !bucket.is_empty() {
                let n = bucket.len() as f64;
                let band = self.tolerance(Some(sum_width / n), self.config.column_band_ratio);
                if (det.bbox.center_x() - sum_center / n).abs() > band {
                    columns.push(std::mem::take(&mut bucket));
                    sum_center = 0.0;
                    sum_width = 0.0;
                }
            }
            sum_center += det.bbox.center_x();
            sum_width += det.bbox.width().max(0.0);
            bucket.push(r);
        }
        if !bucket.is_empty() {
            columns.push(bucket);
        }
        columns
    }

    /// Phase 3b: cut a column where the vertical gap is larger than its
    /// height-derived tolerance. Runs come back top to bottom.
    fn split_column(&self, rows: &[Row], mut column: Vec<SegmentRef>) -> Vec<Vec<SegmentRef>> {
        let element = |r: &SegmentRef| rows[r.row].segments[r.segment][0];
        column.sort_by(|a, b| by_key_then_id(element(a), element(b), |d| d.bbox.y_min));
        let gap_tolerance = self.tolerance(
            mean(column.iter().map(|r| element(r).bbox.height().max(0.0))),
            self.config.vertical_gap_ratio,
        );

        let mut runs = Vec::new();
        let mut current: Vec<SegmentRef> = Vec::new();
        let mut bottom_edge = f64::NEG_INFINITY;
        for r in column {
            let det = element(&r);
            if !current.is_empty() && det.bbox.y_min - bottom_edge > gap_tolerance {
                runs.push(std::mem::take(&mut current));
                bottom_edge = f64::NEG_INFINITY;
            }
            bottom_edge = bottom_edge.max(det.bbox.y_max);
            current.push(r);
        }
        if !current.is_empty() {
            runs.push(current);
        }
        runs
    }
}

/// Convenience wrapper over [`SeraphineGrouper::group`].
pub fn group_detections(merged: &[MergedDetection], config: &GroupingConfig) -> GroupingOutcome {
    SeraphineGrouper::new(config.clone()).group(merged)
}

fn by_key_then_id<F>(a: &MergedDetection, b: &MergedDetection, key: F) -> Ordering
where
    F: Fn(&MergedDetection) -> f64,
{
    key(a).total_cmp(&key(b)).then_with(|| a.id.cmp(&b.id))
}

fn mean<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let (sum, n) = values.into_iter().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn make_group(members: &[&MergedDetection]) -> Option<Group> {
    let bbox = BBox::union_all(members.iter().map(|m| &m.bbox))?;
    Some(Group {
        bbox,
        member_ids: members.iter().map(|m| m.id).collect(),
        label: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::{MergeKind, MergedId, SourceId};

    fn det(n: u32, b: [f64; 4]) -> MergedDetection {
        MergedDetection {
            id: MergedId(n),
            bbox: b.into(),
            origin_ids: vec![SourceId::Object(n)],
            text: None,
            confidence: 0.9,
            kind: MergeKind::ObjectOnly,
        }
    }

    /// Five 40×40 boxes, 10 px apart, on one line.
    fn toolbar(y: f64) -> Vec<MergedDetection> {
        (0..5)
            .map(|i| {
                let x = 100.0 + i as f64 * 50.0;
                det(i + 1, [x, y, x + 40.0, y + 40.0])
            })
            .collect()
    }

    fn grouper() -> SeraphineGrouper {
        SeraphineGrouper::new(GroupingConfig::default())
    }

    fn members(layout: &GroupLayout, id: &str) -> Vec<u32> {
        let gid: GroupId = id.parse().unwrap();
        layout
            .get(&gid)
            .unwrap_or_else(|| panic!("missing group {id}"))
            .member_ids
            .iter()
            .map(|m| m.0)
            .collect()
    }

    #[test]
    fn evenly_spaced_boxes_form_one_row() {
        let out = grouper().group(&toolbar(0.0));
        assert_eq!(out.layout.len(), 1);
        assert_eq!(members(&out.layout, "H1_1"), vec![1, 2, 3, 4, 5]);
        assert_eq!(out.analysis.rows, 1);
    }

    #[test]
    fn one_box_shifted_down_becomes_a_singleton() {
        let mut boxes = toolbar(0.0);
        boxes[4].bbox = BBox::new(300.0, 500.0, 340.0, 540.0);
        let out = grouper().group(&boxes);
        assert_eq!(out.layout.len(), 2);
        assert_eq!(members(&out.layout, "H1_1"), vec![1, 2, 3, 4]);
        assert_eq!(members(&out.layout, "H2_1"), vec![5]);
        assert_eq!(out.analysis.singleton_groups, 1);
    }

    #[test]
    fn a_hole_in_the_middle_keeps_the_row_together() {
        let mut boxes = toolbar(0.0);
        boxes[2].bbox = BBox::new(200.0, 500.0, 240.0, 540.0);
        let out = grouper().group(&boxes);
        assert_eq!(members(&out.layout, "H1_1"), vec![1, 2, 4, 5]);
        assert_eq!(members(&out.layout, "H2_1"), vec![3]);
    }

    #[test]
    fn far_apart_clusters_split_the_row() {
        let mut boxes = toolbar(0.0);
        boxes.push(det(6, [1200.0, 5.0, 1240.0, 35.0]));
        boxes.push(det(7, [1250.0, 5.0, 1290.0, 35.0]));
        let out = grouper().group(&boxes);
        assert_eq!(members(&out.layout, "H1_1"), vec![1, 2, 3, 4, 5]);
        assert_eq!(members(&out.layout, "H1_2"), vec![6, 7]);
    }

    #[test]
    fn stacked_isolated_icons_form_a_column() {
        let sidebar: Vec<MergedDetection> = (0..4)
            .map(|i| {
                let y = 100.0 + i as f64 * 48.0;
                det(i + 1, [0.0, y, 32.0, y + 32.0])
            })
            .collect();
        let out = grouper().group(&sidebar);
        assert_eq!(out.layout.len(), 1);
        assert_eq!(members(&out.layout, "V1_1"), vec![1, 2, 3, 4]);
        assert_eq!(out.analysis.vertical_groups, 1);
        assert_eq!(out.analysis.rows, 4);

        let config = GroupingConfig { enable_vertical_groups: false, ..GroupingConfig::default() };
        let out = SeraphineGrouper::new(config).group(&sidebar);
        assert_eq!(out.layout.len(), 4);
        assert_eq!(members(&out.layout, "H4_1"), vec![4]);
    }

    #[test]
    fn rows_and_columns_are_numbered_independently() {
        let mut boxes = toolbar(0.0);
        for i in 0..3u32 {
            let y = 200.0 + i as f64 * 48.0;
            boxes.push(det(10 + i, [0.0, y, 32.0, y + 32.0]));
        }
        // Far below and far right of everything else.
        boxes.push(det(20, [900.0, 900.0, 950.0, 920.0]));

        let out = grouper().group(&boxes);
        let ids: Vec<String> = out.layout.ids().map(ToString::to_string).collect();
        assert_eq!(ids, ["H1_1", "H2_1", "V1_1"]);
        assert_eq!(members(&out.layout, "V1_1"), vec![10, 11, 12]);
        assert_eq!(members(&out.layout, "H2_1"), vec![20]);
    }

    #[test]
    fn column_splits_into_runs_at_large_vertical_gaps() {
        let boxes = vec![
            det(1, [0.0, 0.0, 40.0, 40.0]),
            det(2, [0.0, 40.0, 40.0, 80.0]),
            det(3, [0.0, 400.0, 40.0, 440.0]),
            det(4, [0.0, 440.0, 40.0, 480.0]),
            det(5, [800.0, 0.0, 840.0, 40.0]),
            det(6, [800.0, 40.0, 840.0, 80.0]),
        ];
        let out = group_detections(&boxes, &GroupingConfig::default());

        let ids: Vec<String> = out.layout.ids().map(|id| id.to_string()).collect();
        assert_eq!(ids, ["V1_1", "V1_2", "V2_1"]);
        assert_eq!(members(&out.layout, "V1_1"), vec![1, 2]);
        assert_eq!(members(&out.layout, "V1_2"), vec![3, 4]);
        assert_eq!(members(&out.layout, "V2_1"), vec![5, 6]);
        assert_eq!(out.analysis.horizontal_groups, 0);
    }

    #[test]
    fn row_gap_equal_to_tolerance_does_not_split() {
        // mean width 40 * column_gap_ratio 2.0 = 80
        let touching = vec![det(1, [0.0, 0.0, 40.0, 40.0]), det(2, [120.0, 0.0, 160.0, 40.0])];
        let out = grouper().group(&touching);
        assert_eq!(out.layout.len(), 1);
        assert_eq!(members(&out.layout, "H1_1"), vec![1, 2]);

        let apart = vec![det(1, [0.0, 0.0, 40.0, 40.0]), det(2, [121.0, 0.0, 161.0, 40.0])];
        let out = grouper().group(&apart);
        assert_eq!(members(&out.layout, "H1_1"), vec![1]);
        assert_eq!(members(&out.layout, "H1_2"), vec![2]);
    }

    #[test]
    fn column_gap_equal_to_tolerance_does_not_split() {
        // mean height 40 * vertical_gap_ratio 1.5 = 60
        let stacked = vec![det(1, [0.0, 0.0, 40.0, 40.0]), det(2, [0.0, 100.0, 40.0, 140.0])];
        let out = grouper().group(&stacked);
        assert_eq!(out.layout.len(), 1);
        assert_eq!(members(&out.layout, "V1_1"), vec![1, 2]);

        let apart = vec![det(1, [0.0, 0.0, 40.0, 40.0]), det(2, [0.0, 101.0, 40.0, 141.0])];
        let out = grouper().group(&apart);
        assert_eq!(out.analysis.vertical_groups, 0);
        assert_eq!(members(&out.layout, "H1_1"), vec![1]);
        assert_eq!(members(&out.layout, "H2_1"), vec![2]);
    }

    #[test]
    fn group_bbox_is_the_exact_union() {
        let boxes = vec![
            det(1, [10.0, 12.0, 50.0, 40.0]),
            det(2, [55.0, 8.0, 90.0, 38.0]),
            det(3, [95.0, 15.0, 130.0, 44.0]),
        ];
        let out = grouper().group(&boxes);
        let group = out.layout.get(&GroupId::horizontal(1, 1)).unwrap();
        assert_eq!(group.len(), 3);
        assert_eq!(group.bbox, BBox::new(10.0, 8.0, 130.0, 44.0));
    }

    #[test]
    fn empty_input_gives_empty_layout() {
        let out = grouper().group(&[]);
        assert!(out.layout.is_empty());
        assert_eq!(out.analysis, GroupingAnalysis::default());
    }

    #[test]
    fn isolated_detection_still_gets_a_group() {
        let out = grouper().group(&[det(1, [10.0, 10.0, 20.0, 20.0])]);
        assert_eq!(members(&out.layout, "H1_1"), vec![1]);
    }

    #[test]
    fn zero_height_boxes_fall_back_to_minimum_tolerance() {
        let boxes = vec![
            det(1, [0.0, 10.0, 10.0, 10.0]),
            det(2, [12.0, 11.0, 22.0, 11.0]),
            det(3, [0.0, 60.0, 10.0, 60.0]),
        ];
        let out = grouper().group(&boxes);
        assert_eq!(members(&out.layout, "H1_1"), vec![1, 2]);
        assert_eq!(out.analysis.grouped_detections, 3);
    }

    #[test]
    fn identical_boxes_are_ordered_by_id() {
        let boxes = vec![det(2, [0.0, 0.0, 10.0, 10.0]), det(1, [0.0, 0.0, 10.0, 10.0])];
        let out = grouper().group(&boxes);
        assert_eq!(members(&out.layout, "H1_1"), vec![1, 2]);
    }

    #[test]
    fn every_detection_lands_in_exactly_one_group() {
        let mut boxes = toolbar(0.0);
        boxes.extend((0..6).map(|i| {
            let x = (i * 137 % 900) as f64;
            let y = 80.0 + (i * 71 % 600) as f64;
            det(100 + i, [x, y, x + 30.0, y + 18.0])
        }));
        let out = grouper().group(&boxes);

        let mut seen: Vec<u32> = out
            .layout
            .iter()
            .flat_map(|(_, g)| g.member_ids.iter().map(|m| m.0))
            .collect();
        seen.sort_unstable();
        let mut expected: Vec<u32> = boxes.iter().map(|d| d.id.0).collect();
        expected.sort_unstable();
        assert_eq!(seen, expected);
    }

    #[test]
    fn input_order_does_not_change_the_result() {
        let mut boxes = toolbar(0.0);
        boxes.push(det(6, [0.0, 300.0, 30.0, 330.0]));
        boxes.push(det(7, [0.0, 340.0, 30.0, 370.0]));
        let forward = serde_json::to_string(&grouper().group(&boxes).layout).unwrap();
        boxes.reverse();
        let backward = serde_json::to_string(&grouper().group(&boxes).layout).unwrap();
        assert_eq!(forward, backward);
    }
}
