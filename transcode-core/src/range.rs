//! Frame range lists.
//!
//! A range list selects the frames a run cares about, for example
//! `"0-250 1000-1500/2"`. Endpoints are frame numbers or timecodes of the
//! form `hh:mm:ss` with an optional `.ff` frame suffix. Ranges are half-open:
//! `10-20` covers frames 10 through 19.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Frame rate assumed when a range list is parsed without one.
pub const DEFAULT_FPS: f64 = 25.0;

/// One `[start, end)` interval with a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RangeFields")]
pub struct FrameRange {
    start: u64,
    end: u64,
    step: u64,
}

/// Unchecked serialized form of a [`FrameRange`].
#[derive(Deserialize)]
struct RangeFields {
    start: u64,
    end: u64,
    #[serde(default = "unit_step")]
    step: u64,
}

fn unit_step() -> u64 {
    1
}

impl TryFrom<RangeFields> for FrameRange {
    type Error = String;

    fn try_from(fields: RangeFields) -> std::result::Result<Self, String> {
        if fields.step == 0 {
            return Err("step must be at least 1".into());
        }
        if fields.end < fields.start {
            return Err(format!("range {}-{} ends before it starts", fields.start, fields.end));
        }
        Ok(Self::new(fields.start, fields.end).with_step(fields.step))
    }
}

impl FrameRange {
    /// Create a range with step 1.
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end, step: 1 }
    }

    /// First frame included.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// First frame excluded.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Step between selected frames, at least 1.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Set the step.
    #[must_use]
    pub fn with_step(mut self, step: u64) -> Self {
        self.step = step.max(1);
        self
    }

    /// Whether `frame` falls inside the interval.
    pub fn contains(&self, frame: u64) -> bool {
        frame >= self.start && frame < self.end
    }

    /// Number of frames covered.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Whether the interval covers no frame.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl fmt::Display for FrameRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)?;
        if self.step > 1 {
            write!(f, "/{}", self.step)?;
        }
        Ok(())
    }
}

/// An ordered list of frame ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameRanges {
    ranges: Vec<FrameRange>,
}

impl FrameRanges {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a range.
    pub fn push(&mut self, range: FrameRange) {
        self.ranges.push(range);
    }

    /// Parse a whitespace or comma separated list using `fps` for timecodes.
    pub fn parse(input: &str, fps: f64) -> Result<Self> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(Error::invalid_range(input, "frame rate must be positive"));
        }
        let mut ranges = Self::new();
        for token in input
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
        {
            ranges.push(parse_range(token, fps).map_err(|reason| Error::invalid_range(input, reason))?);
        }
        if ranges.is_empty() {
            return Err(Error::invalid_range(input, "no ranges given"));
        }
        Ok(ranges)
    }

    /// Whether any range contains `frame`.
    pub fn contains(&self, frame: u64) -> bool {
        self.ranges.iter().any(|r| r.contains(frame))
    }

    /// Step of the first range containing `frame`.
    pub fn step_at(&self, frame: u64) -> Option<u64> {
        self.ranges.iter().find(|r| r.contains(frame)).map(|r| r.step)
    }

    /// Whether `frame` is selected: inside a range and on its step.
    pub fn selects(&self, frame: u64) -> bool {
        self.step_at(frame).is_some_and(|step| frame % step == 0)
    }

    /// Total frames covered by all ranges.
    pub fn total_frames(&self) -> u64 {
        self.ranges.iter().map(FrameRange::len).sum()
    }

    /// Highest excluded end across all ranges.
    pub fn end(&self) -> Option<u64> {
        self.ranges.iter().map(|r| r.end).max()
    }

    /// Number of ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Iterate over the ranges in order.
    pub fn iter(&self) -> impl Iterator<Item = &FrameRange> {
        self.ranges.iter()
    }
}

impl FromStr for FrameRanges {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, DEFAULT_FPS)
    }
}

impl fmt::Display for FrameRanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", range)?;
        }
        Ok(())
    }
}

fn parse_range(token: &str, fps: f64) -> std::result::Result<FrameRange, String> {
    let (span, step) = match token.split_once('/') {
        Some((span, step)) => {
            let step: u64 = step.parse().map_err(|_| format!("bad step '{}'", step))?;
            if step == 0 {
                return Err("step must be at least 1".into());
            }
            (span, step)
        }
        None => (token, 1),
    };

    let range = match span.split_once('-') {
        Some((start, end)) => {
            let start = parse_point(start, fps)?;
            let end = parse_point(end, fps)?;
            if end < start {
                return Err(format!("range '{}' ends before it starts", span));
            }
            FrameRange::new(start, end)
        }
        None => {
            let frame = parse_point(span, fps)?;
            let end = frame.checked_add(1).ok_or("frame number too large")?;
            FrameRange::new(frame, end)
        }
    };
    Ok(range.with_step(step))
}

/// Frame number or `hh:mm:ss[.ff]` timecode.
fn parse_point(text: &str, fps: f64) -> std::result::Result<u64, String> {
    if !text.contains(':') {
        return text.parse().map_err(|_| format!("bad frame number '{}'", text));
    }

    let (clock, frames) = match text.split_once('.') {
        Some((clock, frames)) => {
            let frames: u64 = frames.parse().map_err(|_| format!("bad frame suffix in '{}'", text))?;
            (clock, frames)
        }
        None => (text, 0),
    };

    let mut seconds = 0u64;
    let mut fields = 0;
    for part in clock.split(':') {
        let value: u64 = part.parse().map_err(|_| format!("bad timecode '{}'", text))?;
        seconds = seconds
            .checked_mul(60)
            .and_then(|s| s.checked_add(value))
            .ok_or_else(|| format!("timecode '{}' too large", text))?;
        fields += 1;
    }
    if fields > 3 {
        return Err(format!("bad timecode '{}'", text));
    }

    let frame = (seconds as f64 * fps).round();
    if frame >= u64::MAX as f64 {
        return Err(format!("timecode '{}' too large", text));
    }
    (frame as u64)
        .checked_add(frames)
        .ok_or_else(|| format!("timecode '{}' too large", text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_numbers() {
        let ranges: FrameRanges = "0-10 20-30/5".parse().unwrap();
        assert_eq!(ranges.len(), 2);
        assert!(ranges.contains(0));
        assert!(!ranges.contains(10));
        assert_eq!(ranges.step_at(25), Some(5));
        assert_eq!(ranges.step_at(15), None);
        assert_eq!(ranges.total_frames(), 20);
    }

    #[test]
    fn test_parse_single_frame() {
        let ranges: FrameRanges = "42".parse().unwrap();
        assert!(ranges.contains(42));
        assert!(!ranges.contains(43));
    }

    #[test]
    fn test_parse_timecodes() {
        let ranges = FrameRanges::parse("00:00:01-00:00:02.5", 25.0).unwrap();
        let range = ranges.iter().next().copied().unwrap();
        assert_eq!(range.start(), 25);
        assert_eq!(range.end(), 55);
    }

    #[test]
    fn test_selects_on_step() {
        let ranges: FrameRanges = "0-10/3".parse().unwrap();
        let selected: Vec<u64> = (0..12).filter(|f| ranges.selects(*f)).collect();
        assert_eq!(selected, vec![0, 3, 6, 9]);
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<FrameRanges>().is_err());
        assert!("10-5".parse::<FrameRanges>().is_err());
        assert!("1-x".parse::<FrameRanges>().is_err());
        assert!("0-10/0".parse::<FrameRanges>().is_err());
        assert!(FrameRanges::parse("0-10", 0.0).is_err());
    }

    #[test]
    fn test_huge_frame_numbers_rejected() {
        assert!(u64::MAX.to_string().parse::<FrameRanges>().is_err());
        let below = (u64::MAX - 1).to_string().parse::<FrameRanges>().unwrap();
        assert!(below.contains(u64::MAX - 1));
        assert!(FrameRanges::parse("9999999999999999:00:00", 25.0).is_err());
    }

    #[test]
    fn test_deserialize_checks_step() {
        let range: FrameRange = serde_json::from_str(r#"{"start": 2, "end": 8, "step": 3}"#).unwrap();
        assert_eq!((range.start(), range.end(), range.step()), (2, 8, 3));
        let range: FrameRange = serde_json::from_str(r#"{"start": 2, "end": 8}"#).unwrap();
        assert_eq!(range.step(), 1);
        assert!(serde_json::from_str::<FrameRange>(r#"{"start": 0, "end": 8, "step": 0}"#).is_err());
        assert!(serde_json::from_str::<FrameRanges>(r#"[{"start": 9, "end": 8}]"#).is_err());
    }

    #[test]
    fn test_display() {
        let ranges: FrameRanges = "0-10, 20-30/2".parse().unwrap();
        assert_eq!(ranges.to_string(), "0-10 20-30/2");
        assert_eq!(ranges.end(), Some(30));
    }
}
