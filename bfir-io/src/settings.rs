//! Persisted defaults for filter construction
//!
//! Stored as `key=value` lines in the user's config directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bfir_engine::Precision;

/// User settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Partition length in samples
    pub filter_length: usize,
    pub precision: Precision,
    /// Partitions used for rendered equalizers
    pub eq_blocks: usize,
    /// Dither integer output
    pub dither: bool,
    /// Cap on the dither table in bytes, 0 for none
    pub max_dither_table_size: usize,
    /// Directory holding transform plan wisdom
    pub wisdom_dir: Option<PathBuf>,
    /// Directory for rendered equalizers and convolved impulses
    pub output_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            filter_length: 1024,
            precision: Precision::Double,
            eq_blocks: 64,
            dither: false,
            max_dither_table_size: 0,
            wisdom_dir: None,
            output_dir: None,
        }
    }
}

impl Settings {
    /// Load settings from the default location
    ///
    /// Returns defaults if the file doesn't exist or can't be read.
    pub fn load() -> Self {
        let path = Self::settings_path();
        Self::load_from(&path).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn save(&self) -> io::Result<()> {
        let path = Self::settings_path();
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.serialize())
    }

    pub fn settings_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bfir")
            .join("settings.txt")
    }

    /// Where generated impulse files go when no directory is configured
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("bfir")
        })
    }

    fn parse(content: &str) -> Self {
        let mut settings = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();

            match key.trim() {
                "filter_length" => {
                    if let Ok(n) = value.parse::<usize>() {
                        if n.is_power_of_two() && n >= 4 {
                            settings.filter_length = n;
                        }
                    }
                }
                "realsize" => {
                    let precision = value
                        .parse()
                        .ok()
                        .and_then(|n| Precision::from_realsize(n).ok());
                    if let Some(precision) = precision {
                        settings.precision = precision;
                    }
                }
                "eq_blocks" => {
                    if let Ok(n) = value.parse::<usize>() {
                        if n > 0 {
                            settings.eq_blocks = n;
                        }
                    }
                }
                "dither" => settings.dither = matches!(value, "true" | "1" | "yes"),
                "max_dither_table_size" => {
                    if let Ok(n) = value.parse() {
                        settings.max_dither_table_size = n;
                    }
                }
                "wisdom_dir" => {
                    if !value.is_empty() {
                        settings.wisdom_dir = Some(PathBuf::from(value));
                    }
                }
                "output_dir" => {
                    if !value.is_empty() {
                        settings.output_dir = Some(PathBuf::from(value));
                    }
                }
                _ => {} // Ignore unknown keys
            }
        }

        settings
    }

    fn serialize(&self) -> String {
        let mut lines = vec![
            "# BFIR Settings".to_string(),
            format!("filter_length={}", self.filter_length),
            format!("realsize={}", self.precision.realsize()),
            format!("eq_blocks={}", self.eq_blocks),
            format!("dither={}", self.dither),
            format!("max_dither_table_size={}", self.max_dither_table_size),
        ];
        if let Some(ref dir) = self.wisdom_dir {
            lines.push(format!("wisdom_dir={}", dir.display()));
        }
        if let Some(ref dir) = self.output_dir {
            lines.push(format!("output_dir={}", dir.display()));
        }
        lines.join("\n")
    }
}
