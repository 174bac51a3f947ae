//! Canonical uid composition for tap-to-tap skims.
//!
//! Every cached row is identified by a single integer built by mixed-radix
//! composition over the segmentation attributes (in declaration order), then
//! the origin tap (`btap`), then the destination tap (`atap`):
//!
//! ```text
//! uid = 0
//! for attr in [segment attributes..., btap, atap]:
//!     uid = uid * cardinality(attr) + ordinal(value(attr))
//! ```
//!
//! Access points go last so that all rows of one segment combination occupy
//! one contiguous block of `num_taps * num_taps` uids. The uid doubles as the
//! row offset into a fully populated buffer, so this ordering is also the
//! on-disk row order of the static cache.

use crate::config::TapTapSettings;
use crate::error::{Error, Result};
use crate::segmentation::{AttributeValue, Attributes, Ordinalizer, Segmentation};
use itertools::Itertools;
use std::ops::Range;

/// Origin access point attribute name
pub const ORIG_TAP: &str = "btap";
/// Destination access point attribute name
pub const DEST_TAP: &str = "atap";

/// One origin/destination pair of a segment block, with its uid.
#[derive(Debug, Clone, PartialEq)]
pub struct OdRow {
    pub uid: u64,
    pub btap: AttributeValue,
    pub atap: AttributeValue,
}

#[derive(Debug, Clone)]
pub struct TapTapUidCalculator {
    segments: Vec<Ordinalizer>,
    // btap and atap range over the same physical points and share one ordinalizer
    taps: Ordinalizer,
    set_names: Vec<String>,
    num_combinations: u64,
    num_rows: u64,
}

impl TapTapUidCalculator {
    pub fn new(
        segmentation: &Segmentation,
        tap_ids: Vec<AttributeValue>,
        set_names: Vec<String>,
    ) -> Result<Self> {
        let mut segments = Vec::with_capacity(segmentation.len());
        for (name, values) in segmentation.iter() {
            if name == ORIG_TAP || name == DEST_TAP {
                return Err(Error::InvalidConfig(format!(
                    "'{}' is reserved for access points and cannot be a segment attribute",
                    name
                )));
            }
            if segments.iter().any(|o: &Ordinalizer| o.name() == name) {
                return Err(Error::InvalidConfig(format!(
                    "segment attribute '{}' declared twice",
                    name
                )));
            }
            segments.push(Ordinalizer::new(name, values.to_vec())?);
        }

        if set_names.is_empty() {
            return Err(Error::InvalidConfig("no utility sets configured".to_string()));
        }

        let taps = Ordinalizer::new(ORIG_TAP, tap_ids)?;

        let overflow = || Error::InvalidConfig("uid key space exceeds u64".to_string());
        let num_combinations = segments
            .iter()
            .try_fold(1u64, |acc, o| acc.checked_mul(o.cardinality()))
            .ok_or_else(overflow)?;
        let num_rows = num_combinations
            .checked_mul(taps.cardinality())
            .and_then(|n| n.checked_mul(taps.cardinality()))
            .ok_or_else(overflow)?;
        // buffers are indexed with usize
        usize::try_from(num_rows)
            .ok()
            .and_then(|rows| rows.checked_mul(set_names.len()))
            .ok_or_else(overflow)?;

        Ok(Self {
            segments,
            taps,
            set_names,
            num_combinations,
            num_rows,
        })
    }

    pub fn from_settings(settings: &TapTapSettings, tap_ids: Vec<AttributeValue>) -> Result<Self> {
        Self::new(
            &settings.attribute_segments,
            tap_ids,
            settings.set_names.clone(),
        )
    }

    pub fn set_names(&self) -> &[String] {
        &self.set_names
    }

    pub fn num_sets(&self) -> usize {
        self.set_names.len()
    }

    pub fn num_taps(&self) -> u64 {
        self.taps.cardinality()
    }

    pub fn num_combinations(&self) -> u64 {
        self.num_combinations
    }

    pub fn tap_ids(&self) -> &[AttributeValue] {
        self.taps.values()
    }

    /// `(num_combinations * num_taps * num_taps, num_sets)`
    pub fn fully_populated_shape(&self) -> (usize, usize) {
        (self.num_rows as usize, self.set_names.len())
    }

    /// Total number of cells in a fully populated buffer.
    pub fn fully_populated_len(&self) -> usize {
        let (rows, cols) = self.fully_populated_shape();
        rows * cols
    }

    /// `(num_combinations, num_od_rows, num_sets)`
    pub fn skim_shape(&self) -> (usize, usize, usize) {
        let num_od_rows = self.taps.cardinality() * self.taps.cardinality();
        (
            self.num_combinations as usize,
            num_od_rows as usize,
            self.set_names.len(),
        )
    }

    /// Row labels of a fully populated table, in buffer order.
    pub fn fully_populated_uids(&self) -> Range<u64> {
        0..self.num_rows
    }

    /// Compute the uid of one row. Attributes are looked up in `row` first and
    /// then in `scalar`; an attribute present in neither is an error.
    pub fn compute_uid(&self, row: &Attributes, scalar: &Attributes) -> Result<u64> {
        let mut uid = 0u64;
        for step in self.canonical_order() {
            let name = step.name();
            let value = row
                .get(name)
                .or_else(|| scalar.get(name))
                .ok_or_else(|| Error::MissingAttribute(name.to_string()))?;
            uid = uid * step.ordinalizer.cardinality() + step.ordinalizer.ordinal(value)?;
        }
        Ok(uid)
    }

    /// Batch form of [`compute_uid`](Self::compute_uid).
    pub fn compute_uids(&self, rows: &[Attributes], scalar: &Attributes) -> Result<Vec<u64>> {
        rows.iter().map(|row| self.compute_uid(row, scalar)).collect()
    }

    /// Ordinal position of a segment combination within the segment space.
    /// Access points are ignored; every segment attribute must be present.
    pub fn segment_offset(&self, scalar: &Attributes) -> Result<u64> {
        let mut offset = 0u64;
        for ordinalizer in &self.segments {
            let value = scalar
                .get(ordinalizer.name())
                .ok_or_else(|| Error::MissingAttribute(ordinalizer.name().to_string()))?;
            offset = offset * ordinalizer.cardinality() + ordinalizer.ordinal(value)?;
        }
        Ok(offset)
    }

    /// Uids of one segment combination's contiguous block.
    pub fn segment_uids(&self, scalar: &Attributes) -> Result<Range<u64>> {
        let block = self.taps.cardinality() * self.taps.cardinality();
        let start = self.segment_offset(scalar)? * block;
        Ok(start..start + block)
    }

    /// Every segment combination, in uid order. The returned iterator holds no
    /// state beyond a cursor, so calling this again replays the same sequence.
    pub fn segment_combinations(&self) -> SegmentCombinations<'_> {
        SegmentCombinations {
            segments: &self.segments,
            next: 0,
            end: self.num_combinations,
        }
    }

    /// `(segment offset, attributes)` for every segment combination.
    pub fn scalar_attribute_combinations(&self) -> Vec<(u64, Attributes)> {
        self.segment_combinations()
            .enumerate()
            .map(|(offset, attrs)| (offset as u64, attrs))
            .collect()
    }

    /// The row-major od grid of one segment combination: for every btap, every
    /// atap. Rows come out in ascending uid order.
    pub fn od_rows(&self, scalar: &Attributes) -> Result<Vec<OdRow>> {
        let taps = self.taps.values();
        let mut rows = Vec::with_capacity(taps.len() * taps.len());
        let mut row = Attributes::with_capacity(2);
        for (btap, atap) in taps.iter().cartesian_product(taps.iter()) {
            row.insert(ORIG_TAP.to_string(), btap.clone());
            row.insert(DEST_TAP.to_string(), atap.clone());
            rows.push(OdRow {
                uid: self.compute_uid(&row, scalar)?,
                btap: btap.clone(),
                atap: atap.clone(),
            });
        }

        if let Some(uid) = rows.iter().map(|r| r.uid).duplicates().next() {
            return Err(Error::DuplicateUid(uid));
        }
        Ok(rows)
    }

    fn canonical_order(&self) -> impl Iterator<Item = Step<'_>> {
        self.segments
            .iter()
            .map(|ordinalizer| Step {
                ordinalizer,
                tap: None,
            })
            .chain([ORIG_TAP, DEST_TAP].into_iter().map(|tap| Step {
                ordinalizer: &self.taps,
                tap: Some(tap),
            }))
    }
}

struct Step<'a> {
    ordinalizer: &'a Ordinalizer,
    tap: Option<&'static str>,
}

impl Step<'_> {
    fn name(&self) -> &str {
        match self.tap {
            Some(tap) => tap,
            None => self.ordinalizer.name(),
        }
    }
}

/// Lazy iterator over segment combinations, decoding each combination index
/// with the same mixed radix used for uids.
#[derive(Debug, Clone)]
pub struct SegmentCombinations<'a> {
    segments: &'a [Ordinalizer],
    next: u64,
    end: u64,
}

impl Iterator for SegmentCombinations<'_> {
    type Item = Attributes;

    fn next(&mut self) -> Option<Attributes> {
        if self.next >= self.end {
            return None;
        }

        let mut remainder = self.next;
        let mut attrs = Attributes::with_capacity(self.segments.len());
        for ordinalizer in self.segments.iter().rev() {
            let ordinal = remainder % ordinalizer.cardinality();
            remainder /= ordinalizer.cardinality();
            if let Some(value) = ordinalizer.value(ordinal) {
                attrs.insert(ordinalizer.name().to_string(), value.clone());
            }
        }

        self.next += 1;
        Some(attrs)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SegmentCombinations<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::attributes;
    use std::collections::HashSet;

    fn tod_calculator() -> TapTapUidCalculator {
        let segmentation = Segmentation::new().with_attribute("tod", vec!["AM".into(), "MD".into()]);
        TapTapUidCalculator::new(
            &segmentation,
            vec![10.into(), 20.into()],
            vec!["fastest".to_string(), "cheapest".to_string(), "shortest".to_string()],
        )
        .unwrap()
    }

    fn three_attribute_calculator() -> TapTapUidCalculator {
        let segmentation = Segmentation::new()
            .with_attribute("demographic_segment", vec![0.into(), 1.into()])
            .with_attribute("tod", vec!["AM".into(), "MD".into(), "PM".into()])
            .with_attribute("access_mode", vec!["walk".into(), "drive".into()]);
        TapTapUidCalculator::new(
            &segmentation,
            vec![101.into(), 102.into(), 105.into()],
            vec!["fastest".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_fully_populated_shape() {
        let calc = tod_calculator();
        assert_eq!(calc.fully_populated_shape(), (8, 3));
        assert_eq!(calc.skim_shape(), (2, 4, 3));
        assert_eq!(calc.fully_populated_uids(), 0..8);
        assert_eq!(calc.fully_populated_len(), 24);
    }

    #[test]
    fn test_compute_uid_corners() {
        let calc = tod_calculator();

        let first = calc
            .compute_uid(
                &attributes([("btap", 10), ("atap", 10)]),
                &attributes([("tod", "AM")]),
            )
            .unwrap();
        assert_eq!(first, 0);

        // MD=1, btap 20=1, atap 20=1 -> 1*2*2 + 1*2 + 1
        let last = calc
            .compute_uid(
                &attributes([("btap", 20), ("atap", 20)]),
                &attributes([("tod", "MD")]),
            )
            .unwrap();
        assert_eq!(last, 7);
    }

    #[test]
    fn test_row_attributes_take_precedence() {
        let calc = tod_calculator();
        let row = attributes([
            ("btap", AttributeValue::from(10)),
            ("atap", 20.into()),
            ("tod", "MD".into()),
        ]);
        let uid = calc.compute_uid(&row, &attributes([("tod", "AM")])).unwrap();
        assert_eq!(uid, 5);
    }

    #[test]
    fn test_missing_attribute() {
        let calc = tod_calculator();
        let result = calc.compute_uid(&attributes([("btap", 10), ("atap", 10)]), &Attributes::new());
        assert!(matches!(result, Err(Error::MissingAttribute(ref name)) if name == "tod"));
    }

    #[test]
    fn test_unknown_tap_fails_fast() {
        let calc = tod_calculator();
        let result = calc.compute_uid(
            &attributes([("btap", 10), ("atap", 30)]),
            &attributes([("tod", "AM")]),
        );
        assert!(matches!(result, Err(Error::UnknownAttributeValue { .. })));
    }

    #[test]
    fn test_compute_uid_is_a_bijection() {
        let calc = three_attribute_calculator();
        let mut seen = HashSet::new();

        for scalar in calc.segment_combinations() {
            for (btap, atap) in calc.tap_ids().iter().cartesian_product(calc.tap_ids()) {
                let row = attributes([("btap", btap.clone()), ("atap", atap.clone())]);
                let uid = calc.compute_uid(&row, &scalar).unwrap();
                assert!(seen.insert(uid), "uid {} produced twice", uid);
            }
        }

        let (rows, _) = calc.fully_populated_shape();
        assert_eq!(seen.len(), rows);
        assert!(seen.iter().all(|uid| (*uid as usize) < rows));
    }

    #[test]
    fn test_segment_combinations_follow_uid_order() {
        let calc = three_attribute_calculator();
        let combos: Vec<_> = calc.segment_combinations().collect();
        assert_eq!(combos.len(), 12);
        assert_eq!(calc.segment_combinations().len(), 12);

        assert_eq!(
            combos[0],
            attributes([
                ("demographic_segment", AttributeValue::from(0)),
                ("tod", "AM".into()),
                ("access_mode", "walk".into()),
            ])
        );
        assert_eq!(
            combos[1],
            attributes([
                ("demographic_segment", AttributeValue::from(0)),
                ("tod", "AM".into()),
                ("access_mode", "drive".into()),
            ])
        );

        for (offset, scalar) in combos.iter().enumerate() {
            assert_eq!(calc.segment_offset(scalar).unwrap(), offset as u64);
        }
    }

    #[test]
    fn test_segment_combinations_restartable() {
        let calc = three_attribute_calculator();
        let first: Vec<_> = calc.segment_combinations().collect();
        let second: Vec<_> = calc.segment_combinations().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_no_segments_yields_single_combination() {
        let calc = TapTapUidCalculator::new(
            &Segmentation::new(),
            vec![1.into(), 2.into()],
            vec!["fastest".to_string()],
        )
        .unwrap();

        let combos: Vec<_> = calc.segment_combinations().collect();
        assert_eq!(combos, vec![Attributes::new()]);
        assert_eq!(calc.fully_populated_shape(), (4, 1));
    }

    #[test]
    fn test_od_rows_are_contiguous_segment_block() {
        let calc = three_attribute_calculator();
        let scalar = attributes([
            ("demographic_segment", AttributeValue::from(1)),
            ("tod", "MD".into()),
            ("access_mode", "walk".into()),
        ]);

        let rows = calc.od_rows(&scalar).unwrap();
        let block = calc.segment_uids(&scalar).unwrap();
        assert_eq!(rows.len(), 9);
        assert_eq!(rows.iter().map(|r| r.uid).collect::<Vec<_>>(), block.collect::<Vec<_>>());
        assert_eq!(rows[1].btap, AttributeValue::from(101));
        assert_eq!(rows[1].atap, AttributeValue::from(102));
    }

    #[test]
    fn test_segment_offset_requires_all_segments() {
        let calc = three_attribute_calculator();
        let result = calc.segment_offset(&attributes([("tod", "AM")]));
        assert!(matches!(result, Err(Error::MissingAttribute(_))));
    }

    #[test]
    fn test_reserved_and_empty_configs_rejected() {
        let reserved = Segmentation::new().with_attribute("btap", vec![1.into()]);
        assert!(matches!(
            TapTapUidCalculator::new(&reserved, vec![1.into()], vec!["s".to_string()]),
            Err(Error::InvalidConfig(_))
        ));

        assert!(matches!(
            TapTapUidCalculator::new(&Segmentation::new(), vec![1.into()], vec![]),
            Err(Error::InvalidConfig(_))
        ));

        assert!(matches!(
            TapTapUidCalculator::new(&Segmentation::new(), vec![], vec!["s".to_string()]),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_scalar_attribute_combinations() {
        let calc = tod_calculator();
        let combos = calc.scalar_attribute_combinations();
        assert_eq!(combos.len(), 2);
        assert_eq!(combos[1].0, 1);
        assert_eq!(combos[1].1, attributes([("tod", "MD")]));
    }
}
