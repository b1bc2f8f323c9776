use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use serde_json::json;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, OutputFormat};
use crate::report::{Outcome, PersistedReport};

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    /// 分类报告路径
    pub report: PathBuf,
    /// 输出格式
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
    /// 只显示出错的图片
    #[arg(short, long)]
    pub errors_only: bool,
}

impl SubCommandExtend for ShowCommand {
    fn run(&self, _opts: &Opts) -> Result<()> {
        let report = PersistedReport::load(&self.report)?;
        let results = report
            .results
            .iter()
            .filter(|e| !self.errors_only || e.outcome.is_error())
            .collect::<Vec<_>>();

        match self.format {
            OutputFormat::Json => {
                let value = json!({ "results": results, "summary": report.summary });
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
            OutputFormat::Table => {
                for entry in results {
                    let evaluated = match &entry.outcome {
                        Outcome::Classified(r) => r.evaluated_label.as_str(),
                        Outcome::Failed { .. } => "-",
                    };
                    println!("{}\t{}\t{}", entry.key, entry.outcome.expected_label(), evaluated);
                }
                let s = &report.summary;
                println!(
                    "total: {}\terrors: {}\tfailed: {}\terror rate: {:.2}%",
                    s.total,
                    s.error_count,
                    s.failed,
                    s.error_rate * 100.
                );
            }
        }
        Ok(())
    }
}
