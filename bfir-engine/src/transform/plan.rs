//! FFT plan cache and wisdom file

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::TransformError;
use crate::log::SharedSink;
use crate::real::Real;

/// Highest supported transform order (size `2^31`)
pub const MAX_ORDER: u32 = 31;

const ORDERS: usize = MAX_ORDER as usize + 1;

/// Transform direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Real time domain to half-complex
    Forward,
    /// Half-complex to real time domain
    Inverse,
}

/// Whether input and output share a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    OutOfPlace,
    InPlace,
}

impl Direction {
    fn index(self) -> usize {
        match self {
            Direction::Forward => 0,
            Direction::Inverse => 1,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Inverse => "inverse",
        }
    }
}

impl Placement {
    fn index(self) -> usize {
        match self {
            Placement::OutOfPlace => 0,
            Placement::InPlace => 1,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Placement::OutOfPlace => "out-of-place",
            Placement::InPlace => "in-place",
        }
    }
}

/// A planned real transform
#[derive(Clone)]
pub enum Plan<T: Real> {
    Forward(Arc<dyn RealToComplex<T>>),
    Inverse(Arc<dyn ComplexToReal<T>>),
}

impl<T: Real> Plan<T> {
    pub fn len(&self) -> usize {
        match self {
            Plan::Forward(p) => p.len(),
            Plan::Inverse(p) => p.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scratch_len(&self) -> usize {
        match self {
            Plan::Forward(p) => p.get_scratch_len(),
            Plan::Inverse(p) => p.get_scratch_len(),
        }
    }
}

/// Plans indexed by direction, placement and order, created on first use
pub struct PlanCache<T: Real> {
    planner: RealFftPlanner<T>,
    table: [[Vec<Option<Plan<T>>>; 2]; 2],
    /// Bit `order` set when the entry is populated
    generated: [[u32; 2]; 2],
    sink: SharedSink,
}

impl<T: Real> PlanCache<T> {
    pub fn new(sink: SharedSink) -> Self {
        let empty = || (0..ORDERS).map(|_| None).collect::<Vec<_>>();
        Self {
            planner: RealFftPlanner::new(),
            table: [[empty(), empty()], [empty(), empty()]],
            generated: [[0; 2]; 2],
            sink,
        }
    }

    pub fn is_planned(&self, direction: Direction, placement: Placement, order: u32) -> bool {
        order <= MAX_ORDER
            && self.generated[direction.index()][placement.index()] & (1 << order) != 0
    }

    /// Cached plan, if one exists
    pub fn get(&self, direction: Direction, placement: Placement, order: u32) -> Option<&Plan<T>> {
        if order > MAX_ORDER {
            return None;
        }
        self.table[direction.index()][placement.index()][order as usize].as_ref()
    }

    /// Cached plan, created first if needed
    pub fn plan(
        &mut self,
        direction: Direction,
        placement: Placement,
        order: u32,
    ) -> Result<&Plan<T>, TransformError> {
        if order > MAX_ORDER {
            return Err(TransformError::OrderOutOfRange(order));
        }
        let (d, p, o) = (direction.index(), placement.index(), order as usize);
        if self.table[d][p][o].is_none() {
            let size = 1usize << order;
            self.sink.log(&format!(
                "Creating {} {} plan of size {}...",
                direction.name(),
                placement.name(),
                size
            ));
            let plan = match direction {
                Direction::Forward => Plan::Forward(self.planner.plan_fft_forward(size)),
                Direction::Inverse => Plan::Inverse(self.planner.plan_fft_inverse(size)),
            };
            self.table[d][p][o] = Some(plan);
            self.generated[d][p] |= 1 << order;
        }
        self.table[d][p][o]
            .as_ref()
            .ok_or(TransformError::OrderOutOfRange(order))
    }

    /// Every populated entry
    pub fn planned(&self) -> Vec<(Direction, Placement, u32)> {
        let mut entries = Vec::new();
        for direction in [Direction::Forward, Direction::Inverse] {
            for placement in [Placement::OutOfPlace, Placement::InPlace] {
                for order in 0..=MAX_ORDER {
                    if self.is_planned(direction, placement, order) {
                        entries.push((direction, placement, order));
                    }
                }
            }
        }
        entries
    }

    /// Pre-plan every entry listed in a wisdom file, returning how many were read
    pub fn import_wisdom(&mut self, path: &Path) -> io::Result<usize> {
        let content = fs::read_to_string(path)?;
        let entries = parse_wisdom(&content)?;
        for &(direction, placement, order) in &entries {
            self.plan(direction, placement, order)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        }
        Ok(entries.len())
    }

    /// Write every populated entry to a wisdom file
    pub fn export_wisdom(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut lines = vec!["# bfir wisdom".to_string()];
        for (direction, placement, order) in self.planned() {
            lines.push(format!("{} {} {}", direction.name(), placement.name(), order));
        }
        fs::write(path, lines.join("\n"))
    }
}

/// Wisdom file for a block length and real size inside `dir`
pub fn wisdom_path(dir: &Path, block_length: usize, realsize: usize) -> PathBuf {
    dir.join(format!("wisdom-{}-{}", block_length, realsize))
}

fn parse_wisdom(content: &str) -> io::Result<Vec<(Direction, Placement, u32)>> {
    let invalid = |line: &str| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid wisdom entry: {}", line),
        )
    };

    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let direction = match fields.next() {
            Some("forward") => Direction::Forward,
            Some("inverse") => Direction::Inverse,
            _ => return Err(invalid(line)),
        };
        let placement = match fields.next() {
            Some("out-of-place") => Placement::OutOfPlace,
            Some("in-place") => Placement::InPlace,
            _ => return Err(invalid(line)),
        };
        let order = fields
            .next()
            .and_then(|o| o.parse::<u32>().ok())
            .filter(|&o| o <= MAX_ORDER)
            .ok_or_else(|| invalid(line))?;
        entries.push((direction, placement, order));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::BufferedSink;

    #[test]
    fn test_plans_are_created_once() {
        let sink = Arc::new(BufferedSink::new());
        let mut cache = PlanCache::<f32>::new(sink.clone());
        assert!(!cache.is_planned(Direction::Forward, Placement::InPlace, 10));

        let len = cache.plan(Direction::Forward, Placement::InPlace, 10).unwrap().len();
        assert_eq!(len, 1024);
        cache.plan(Direction::Forward, Placement::InPlace, 10).unwrap();

        assert!(cache.is_planned(Direction::Forward, Placement::InPlace, 10));
        assert!(!cache.is_planned(Direction::Forward, Placement::OutOfPlace, 10));
        assert_eq!(sink.messages().len(), 1);
        assert!(sink.contains("Creating forward in-place plan of size 1024"));
    }

    #[test]
    fn test_order_out_of_range() {
        let mut cache = PlanCache::<f64>::new(Arc::new(BufferedSink::new()));
        assert_eq!(
            cache.plan(Direction::Inverse, Placement::OutOfPlace, 32).err(),
            Some(TransformError::OrderOutOfRange(32))
        );
        assert!(cache.get(Direction::Inverse, Placement::OutOfPlace, 40).is_none());
    }

    #[test]
    fn test_wisdom_roundtrip() {
        let dir = std::env::temp_dir().join(format!("bfir-wisdom-{}", std::process::id()));
        let path = wisdom_path(&dir, 256, 4);
        assert!(path.ends_with("wisdom-256-4"));

        let mut cache = PlanCache::<f32>::new(Arc::new(BufferedSink::new()));
        cache.plan(Direction::Forward, Placement::OutOfPlace, 9).unwrap();
        cache.plan(Direction::Inverse, Placement::InPlace, 9).unwrap();
        cache.export_wisdom(&path).unwrap();

        let mut restored = PlanCache::<f32>::new(Arc::new(BufferedSink::new()));
        assert_eq!(restored.import_wisdom(&path).unwrap(), 2);
        assert_eq!(restored.planned(), cache.planned());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_parse_wisdom_rejects_garbage() {
        assert!(parse_wisdom("forward sideways 3").is_err());
        assert!(parse_wisdom("inverse in-place 99").is_err());
        assert_eq!(parse_wisdom("# only a comment\n\n").unwrap().len(), 0);
    }
}
