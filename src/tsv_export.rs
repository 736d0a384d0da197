//! TSV export for machine-readable run results

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::metrics::LatencySummary;
use crate::swarm::SwarmReport;

/// TSV exporter for swarm results
pub struct TsvExporter {
    dir: PathBuf,
}

impl TsvExporter {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// One row per recorded metric, in worker order
    pub fn export_metrics(&self, report: &SwarmReport, file_name: &str) -> Result<PathBuf> {
        let path = self.dir.join(file_name);
        let mut f = BufWriter::new(
            File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?,
        );

        writeln!(f, "instance\tseq\trole\tmetric\tkind\titem\tunit\timprovement_dir\tvalue")?;
        for worker in &report.workers {
            let (seq, role) = match &worker.result {
                Ok(r) => (r.seq.to_string(), r.role.to_string()),
                Err(_) => ("-".to_string(), "-".to_string()),
            };
            for record in &worker.records {
                writeln!(
                    f,
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    worker.label,
                    seq,
                    role,
                    record.name,
                    record.kind(),
                    record.item_index().map(|i| i.to_string()).unwrap_or_default(),
                    record.unit,
                    record.improvement_dir.as_i8(),
                    record.value
                )?;
            }
        }
        f.flush()?;

        println!("\n✅ Metrics exported to: {}", path.display());
        Ok(path)
    }

    /// One row per (role, metric kind) with histogram statistics
    pub fn export_summary(&self, report: &SwarmReport, file_name: &str) -> Result<PathBuf> {
        let path = self.dir.join(file_name);
        let mut f = BufWriter::new(
            File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?,
        );

        writeln!(f, "role\tkind\tunit\tcount\tmean\tp50\tp90\tp95\tp99\tmax")?;
        for (role, summary) in report.summary_by_role() {
            write_summary_rows(&mut f, role, &summary)?;
        }
        write_summary_rows(&mut f, "all", &report.latency_summary())?;
        f.flush()?;

        println!("✅ Summary exported to: {}", path.display());
        Ok(path)
    }
}

fn write_summary_rows<W: Write>(f: &mut W, role: &str, summary: &LatencySummary) -> Result<()> {
    for s in summary.stats() {
        writeln!(
            f,
            "{}\t{}\t{}\t{}\t{:.2}\t{}\t{}\t{}\t{}\t{}",
            role, s.kind, s.unit, s.count, s.mean, s.p50, s.p90, s.p95, s.p99, s.max
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::Role;
    use crate::executor::ExecutionReport;
    use crate::metrics::{MetricDefinition, MetricRecord};
    use crate::swarm::WorkerOutcome;
    use std::time::Duration;
    use tempfile::TempDir;

    fn report() -> SwarmReport {
        let provider = WorkerOutcome {
            index: 0,
            label: "instance-0".to_string(),
            result: Ok(ExecutionReport {
                seq: 1,
                role: Role::Provider,
                attempted: 2,
                succeeded: 2,
            }),
            records: vec![
                MetricRecord::new(&MetricDefinition::time_to_provide(0), 2_000_000.0),
                MetricRecord::new(&MetricDefinition::time_to_provide(1), 4_000_000.0),
            ],
            messages: vec![],
        };
        let seeker = WorkerOutcome {
            index: 1,
            label: "instance-1".to_string(),
            result: Ok(ExecutionReport {
                seq: 2,
                role: Role::Seeker,
                attempted: 1,
                succeeded: 1,
            }),
            records: vec![
                MetricRecord::new(&MetricDefinition::time_to_find(0), 1_000_000.0),
                MetricRecord::new(&MetricDefinition::peers_found(0), 1.0),
            ],
            messages: vec![],
        };
        SwarmReport {
            run_id: "run".to_string(),
            instances: 2,
            elapsed: Duration::from_secs(1),
            workers: vec![provider, seeker],
        }
    }

    #[test]
    fn test_export_metrics_rows() {
        let dir = TempDir::new().unwrap();
        let path = TsvExporter::new(dir.path()).export_metrics(&report(), "metrics.tsv").unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("instance\tseq\trole"));
        assert_eq!(
            lines[1],
            "instance-0\t1\tprovider\ttime-to-provide-0\ttime-to-provide\t0\tns\t-1\t2000000"
        );
        assert!(lines[4].contains("peers-found-0\tpeers-found\t0\tpeers\t1\t1"));
    }

    #[test]
    fn test_export_summary_rows() {
        let dir = TempDir::new().unwrap();
        let path = TsvExporter::new(dir.path()).export_summary(&report(), "summary.tsv").unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.lines().any(|l| l.starts_with("provider\ttime-to-provide\tus\t2\t")));
        assert!(content.lines().any(|l| l.starts_with("seeker\tpeers-found\tpeers\t1\t")));
        assert!(content.lines().any(|l| l.starts_with("all\ttime-to-find\tus\t1\t")));
    }
}
