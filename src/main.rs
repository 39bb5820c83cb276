// Example runner for the `lot_vision` library.
//
//     lot_vision [--config pipeline.json] regions.json frame1.png [frame2.png ...]
//
// Frames are processed in order as if they were consecutive video frames, each call
// receiving the previous call's spaces. One JSON report is printed per frame.

use clap::Parser;
use lot_vision::{DetectionEngine, LotError, LotResult, PipelineConfig, RegionInput, StillImage};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Parking space occupancy over a sequence of frames")]
struct Args {
    /// Pipeline configuration as JSON; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON array of region definitions.
    regions: PathBuf,
    /// Frames to process, in playback order.
    #[arg(required = true, num_args = 1..)]
    frames: Vec<PathBuf>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> LotResult<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| LotError::invalid_source(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| LotError::invalid_source(format!("{}: {e}", path.display())))
}

async fn run(args: Args) -> LotResult<()> {
    let config: PipelineConfig = match &args.config {
        Some(path) => read_json(path)?,
        None => PipelineConfig::default(),
    };
    let regions: Vec<RegionInput> = read_json(&args.regions)?;
    info!(regions = regions.len(), frames = args.frames.len(), "starting");

    let engine = DetectionEngine::new(config);
    let mut previous = Vec::new();
    for path in &args.frames {
        let frame = StillImage::open(path)?;
        let report = engine.detect(&frame, &regions, &previous).await?;
        info!(
            frame = %path.display(),
            occupied = report.occupied,
            available = report.available,
            "frame done"
        );
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => error!(error = %e, "report did not serialize"),
        }
        previous = report.spaces;
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!(error = %e, "detection failed");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn arguments_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn regions_come_first_and_at_least_one_frame_is_required() {
        let args =
            Args::try_parse_from(["lot_vision", "--config", "c.json", "r.json", "a.png", "b.png"])
                .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("c.json")));
        assert_eq!(args.regions, PathBuf::from("r.json"));
        assert_eq!(args.frames, vec![PathBuf::from("a.png"), PathBuf::from("b.png")]);

        assert!(Args::try_parse_from(["lot_vision", "r.json"]).is_err());
    }
}
