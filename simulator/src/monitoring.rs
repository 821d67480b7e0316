use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    str::FromStr,
    sync::{Arc, Mutex},
};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    config::sim_config::MonitoringConfig,
    error::{Result, SimError},
    pool::Pool,
    task::TaskType,
};

/// Number of events between two metric samples when nothing is configured.
pub const DEFAULT_WINDOW: usize = 1000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub time: f64,
    pub pool: String,
    pub kind: TaskType,
    pub metric: String,
    pub value: f64,
}

/// Append-only receiver of pool metrics.
pub trait MetricsSink: Send {
    fn record(&mut self, pool: &str, kind: TaskType, metric: &str, value: f64, time: f64)
        -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricsFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for MetricsFormat {
    type Err = SimError;

    fn from_str(input: &str) -> Result<MetricsFormat> {
        match input.to_lowercase().as_str() {
            "text" | "txt" => Ok(MetricsFormat::Text),
            "json" => Ok(MetricsFormat::Json),
            _ => Err(SimError::Config(format!(
                "unknown metrics format `{}`",
                input
            ))),
        }
    }
}

/// Writes one metric per line, as `time pool type metric value` or as a JSON object.
pub struct FileMetricsSink {
    file: BufWriter<File>,
    format: MetricsFormat,
}

impl FileMetricsSink {
    pub fn create<P: AsRef<Path>>(path: P, format: MetricsFormat) -> Result<Self> {
        Ok(FileMetricsSink {
            file: BufWriter::new(File::create(path)?),
            format,
        })
    }
}

impl MetricsSink for FileMetricsSink {
    fn record(
        &mut self,
        pool: &str,
        kind: TaskType,
        metric: &str,
        value: f64,
        time: f64,
    ) -> Result<()> {
        match self.format {
            MetricsFormat::Text => {
                writeln!(&mut self.file, "{} {} {} {} {}", time, pool, kind.name(), metric, value)?
            }
            MetricsFormat::Json => {
                let point = MetricPoint {
                    time,
                    pool: pool.to_string(),
                    kind,
                    metric: metric.to_string(),
                    value,
                };
                serde_json::to_writer(&mut self.file, &point)?;
                writeln!(&mut self.file)?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

/// Keeps points in memory; clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemoryMetricsSink {
    points: Arc<Mutex<Vec<MetricPoint>>>,
}

impl MemoryMetricsSink {
    pub fn points(&self) -> Vec<MetricPoint> {
        match self.points.lock() {
            Ok(points) => points.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl MetricsSink for MemoryMetricsSink {
    fn record(
        &mut self,
        pool: &str,
        kind: TaskType,
        metric: &str,
        value: f64,
        time: f64,
    ) -> Result<()> {
        let point = MetricPoint {
            time,
            pool: pool.to_string(),
            kind,
            metric: metric.to_string(),
            value,
        };
        match self.points.lock() {
            Ok(mut points) => points.push(point),
            Err(poisoned) => poisoned.into_inner().push(point),
        }
        Ok(())
    }
}

/// Samples pool state every `window` events.
pub struct Monitoring {
    sink: Box<dyn MetricsSink>,
    window: usize,
    output_path: Option<String>,
    failed: bool,
}

impl Monitoring {
    pub fn new(sink: Box<dyn MetricsSink>, window: usize) -> Monitoring {
        Monitoring {
            sink,
            window: window.max(1),
            output_path: None,
            failed: false,
        }
    }

    pub fn from_config(config: &MonitoringConfig) -> Result<Monitoring> {
        let format = match &config.format {
            Some(format) => format.parse()?,
            None => MetricsFormat::default(),
        };
        let window = config.window.unwrap_or(DEFAULT_WINDOW);
        let mut monitoring = Monitoring::new(
            Box::new(FileMetricsSink::create(&config.path, format)?),
            window,
        );
        monitoring.output_path = Some(config.path.clone());
        Ok(monitoring)
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn output_path(&self) -> Option<&str> {
        self.output_path.as_deref()
    }

    /// Called after every processed event; samples on window boundaries and after the last event.
    pub fn observe(&mut self, event_index: usize, last: bool, time: f64, pools: &[Pool]) {
        if event_index % self.window == 0 || last {
            if let Err(e) = self.sample(time, pools) {
                if !self.failed {
                    warn!("@{} metrics sink failed: {}", time, e);
                    self.failed = true;
                }
            }
        }
    }

    pub fn sample(&mut self, time: f64, pools: &[Pool]) -> Result<()> {
        for pool in pools {
            for kind in TaskType::ALL {
                let share = pool.share(kind);
                let i = kind.index();
                let metrics = [
                    ("demand", share.demand as f64),
                    ("fairShare", share.fairshare),
                    ("lastTimeAtMinShare", pool.last_at_ms[i]),
                    ("lastTimeAtHalfFairShare", pool.last_at_hf[i]),
                    ("minShare", share.minshare),
                    ("runningTasks", share.alloc as f64),
                    ("weight", share.weight),
                ];
                for (metric, value) in metrics {
                    self.sink.record(&pool.name, kind, metric, value, time)?;
                }
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) {
        if let Err(e) = self.sink.flush() {
            warn!("cannot flush metrics: {}", e);
        }
    }
}
