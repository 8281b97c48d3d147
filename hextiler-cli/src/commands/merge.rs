//! `hextiler merge` - combine tile pyramids under an explicit policy.

use std::path::PathBuf;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use hextiler::merge::MergeJob;
use hextiler::pyramid::{BuildConfig, PyramidBuilder};
use hextiler::store::TileStore;

use super::common::{job_spinner, open_store, PolicyArg, SchemeArg};
use crate::error::CliError;

/// Arguments for the merge command.
#[derive(Debug, Args)]
pub struct MergeArgs {
    /// Source pyramids in precedence order, followed by the target store
    /// (a directory, or a .mbtiles/.sqlite/.db file)
    #[arg(required = true, num_args = 2..)]
    pub paths: Vec<PathBuf>,

    /// Compositing policy for tiles present in more than one source
    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,

    /// Tiling scheme of the pyramids (needed when rebuilding overviews)
    #[arg(long, value_enum, default_value = "tms")]
    pub scheme: SchemeArg,

    /// Recompute coarser zoom levels from the merged finest level
    #[arg(long)]
    pub rebuild_overviews: bool,

    /// Worker threads for tile compositing (0 = one per core)
    #[arg(long, default_value_t = 0)]
    pub workers: usize,
}

/// Run the merge command.
pub fn run(args: MergeArgs, cancel: &CancellationToken) -> Result<(), CliError> {
    let (target_path, source_paths) = args
        .paths
        .split_last()
        .ok_or_else(|| CliError::Usage("merge needs sources and a target".to_string()))?;

    let sources: Vec<Box<dyn TileStore>> = source_paths
        .iter()
        .map(|path| open_store(path))
        .collect::<Result<_, _>>()?;
    let source_refs: Vec<&dyn TileStore> = sources.iter().map(|s| s.as_ref()).collect();
    let target = open_store(target_path)?;

    info!(
        sources = sources.len(),
        target = %target_path.display(),
        "merging pyramids"
    );
    let spinner = job_spinner("merging pyramids");
    let job = MergeJob::new(args.policy.map(Into::into)).with_workers(args.workers);
    let report = job.run(&source_refs, target.as_ref(), cancel)?;
    spinner.finish_with_message(report.to_string());
    println!("{report}");

    if !report.is_complete() {
        return Err(CliError::Partial(report.to_string()));
    }

    if args.rebuild_overviews {
        let zooms = target
            .zoom_levels()
            .map_err(hextiler::TilerError::from)?;
        if let Some(&finest) = zooms.last() {
            let spinner = job_spinner("rebuilding overviews");
            // Overviews go all the way down to zoom 0; a pyramid holding
            // only its finest level has no coarser level to anchor on.
            let builder = PyramidBuilder::new(BuildConfig {
                scheme: args.scheme.into(),
                min_zoom: 0,
                workers: args.workers,
                ..BuildConfig::default()
            });
            let overview_report = builder.coarsen(target.as_ref(), finest, cancel)?;
            spinner.finish_with_message(overview_report.to_string());
            println!("{overview_report}");
            if !overview_report.is_complete() {
                return Err(CliError::Partial(overview_report.to_string()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hextiler::coord::TileKey;
    use hextiler::store::DirectoryStore;
    use hextiler::TileImage;

    fn solid_tile(value: u8) -> TileImage {
        let mut tile = TileImage::blank();
        for p in tile.pixels_mut().pixels_mut() {
            p.0 = [value, value, value, 255];
        }
        tile
    }

    #[test]
    fn test_rebuild_overviews_reaches_zoom_zero_for_finest_only_sources() {
        let dir = tempfile::tempdir().unwrap();
        let a = DirectoryStore::create(dir.path().join("a")).unwrap();
        let b = DirectoryStore::create(dir.path().join("b")).unwrap();
        a.put(&TileKey::new(2, 0, 0), &solid_tile(10)).unwrap();
        b.put(&TileKey::new(2, 3, 3), &solid_tile(20)).unwrap();

        let args = MergeArgs {
            paths: vec![
                dir.path().join("a"),
                dir.path().join("b"),
                dir.path().join("out"),
            ],
            policy: Some(PolicyArg::Overwrite),
            scheme: SchemeArg::Tms,
            rebuild_overviews: true,
            workers: 1,
        };
        run(args, &CancellationToken::new()).unwrap();

        let target = DirectoryStore::create(dir.path().join("out")).unwrap();
        assert!(target.exists(&TileKey::new(0, 0, 0)).unwrap());
        assert_eq!(target.zoom_levels().unwrap(), vec![0, 1, 2]);
    }
}
