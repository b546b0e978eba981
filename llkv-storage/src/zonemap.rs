//! Min/max primary key statistics used to prune objects and blocks.
//!
//! A probe set of keys is summarised into its own [`ZoneMap`]; an object or block
//! whose zonemap does not intersect the probe's cannot contain any probed key.

use crate::keys::PkValue;

/// Inclusive `[min, max]` bounds over the primary keys of an object or block.
///
/// An empty zonemap (no keys seen) intersects nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneMap {
    bounds: Option<(PkValue, PkValue)>,
}

impl ZoneMap {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_values<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a PkValue>,
    {
        let mut zm = Self::empty();
        for v in values {
            zm.update(v);
        }
        zm
    }

    pub fn update(&mut self, value: &PkValue) {
        match &mut self.bounds {
            None => self.bounds = Some((value.clone(), value.clone())),
            Some((min, max)) => {
                if value < min {
                    *min = value.clone();
                } else if value > max {
                    *max = value.clone();
                }
            }
        }
    }

    pub fn merge(&mut self, other: &ZoneMap) {
        if let Some((min, max)) = &other.bounds {
            self.update(min);
            self.update(max);
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    pub fn min(&self) -> Option<&PkValue> {
        self.bounds.as_ref().map(|(min, _)| min)
    }

    pub fn max(&self) -> Option<&PkValue> {
        self.bounds.as_ref().map(|(_, max)| max)
    }

    /// Whether `value` lies within the bounds.
    pub fn contains(&self, value: &PkValue) -> bool {
        match &self.bounds {
            Some((min, max)) => min <= value && value <= max,
            None => false,
        }
    }

    /// Whether the two ranges overlap.
    pub fn intersects(&self, other: &ZoneMap) -> bool {
        match (&self.bounds, &other.bounds) {
            (Some((a_min, a_max)), Some((b_min, b_max))) => a_min <= b_max && b_min <= a_max,
            _ => false,
        }
    }
}
