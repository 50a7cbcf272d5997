use anyhow::{Context, Result};
use beat::patch_format::{BPA_MAGIC, BPM_MAGIC, BPS_MAGIC};
use beat::{apply, archive, binary_diff, binary_patch, create, linear, multi_format, DeltaOptions, Mode};
use clap::{Args, Parser, Subcommand};
use log::warn;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "beat", about = "Binary patch creator and applier for files and folders")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CreateOptions {
    /// Reference matches in the source instead of storing the target verbatim
    #[arg(long)]
    delta: bool,
    /// File whose bytes are embedded as the patch manifest
    #[arg(long, short)]
    manifest: Option<PathBuf>,
    /// Shortest match worth a copy instruction in delta mode
    #[arg(long, default_value_t = DeltaOptions::default().min_match)]
    min_match: usize,
}

impl CreateOptions {
    fn mode(&self) -> Mode {
        if self.delta {
            Mode::Delta
        } else {
            Mode::Linear
        }
    }

    fn delta_options(&self) -> DeltaOptions {
        DeltaOptions {
            min_match: self.min_match,
            ..DeltaOptions::default()
        }
    }

    fn manifest(&self) -> Result<Vec<u8>> {
        read_manifest(self.manifest.as_deref())
    }
}

/// Bytes of an optional manifest file; no file means an empty manifest.
fn read_manifest(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display())),
        None => Ok(Vec::new()),
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a single-file patch (.bps)
    Create {
        /// Original file
        #[arg(long)]
        source: PathBuf,
        /// Modified file
        #[arg(long)]
        target: PathBuf,
        /// Output path for the patch file
        #[arg(long, short)]
        output: PathBuf,
        #[command(flatten)]
        options: CreateOptions,
    },
    /// Apply a single-file patch
    Apply {
        /// Path to the patch file
        #[arg(long, short)]
        patch: PathBuf,
        /// Original file
        #[arg(long)]
        source: PathBuf,
        /// Where to write the patched file
        #[arg(long)]
        target: PathBuf,
    },
    /// Create a multi-file patch (.bpm) between two folders
    CreateMulti {
        /// Original folder
        #[arg(long)]
        source: PathBuf,
        /// Modified folder
        #[arg(long)]
        target: PathBuf,
        /// Output path for the patch file
        #[arg(long, short)]
        output: PathBuf,
        #[command(flatten)]
        options: CreateOptions,
    },
    /// Apply a multi-file patch, building a new folder
    ApplyMulti {
        /// Path to the patch file
        #[arg(long, short)]
        patch: PathBuf,
        /// Original folder
        #[arg(long)]
        source: PathBuf,
        /// Folder to build; removed again if it was created and the patch fails
        #[arg(long)]
        target: PathBuf,
    },
    /// Pack a folder into an archive (.bpa)
    Pack {
        /// Folder to pack
        #[arg(long)]
        source: PathBuf,
        /// Output path for the archive
        #[arg(long, short)]
        output: PathBuf,
        /// File whose bytes are embedded as the archive manifest
        #[arg(long, short)]
        manifest: Option<PathBuf>,
    },
    /// Unpack an archive into a folder
    Unpack {
        /// Path to the archive
        #[arg(long, short)]
        archive: PathBuf,
        /// Folder to create
        #[arg(long)]
        target: PathBuf,
    },
    /// Show the header of a patch or the contents of an archive
    Info {
        /// Path to the patch or archive
        patch: PathBuf,
    },
}

fn print_manifest(manifest: &[u8]) {
    if !manifest.is_empty() {
        println!("  Manifest: {} bytes", manifest.len());
    }
}

fn print_info(path: &Path) -> Result<()> {
    let raw = std::fs::read(path).with_context(|| format!("Failed to read patch: {}", path.display()))?;
    if raw.starts_with(BPS_MAGIC) {
        let info = binary_patch::inspect(&raw)?;
        let instructions = binary_patch::instructions(&raw)?;
        println!("Single-file patch: {}", path.display());
        println!("  Source: {} bytes (crc32 {:08x})", info.source_size, info.source_checksum);
        println!("  Target: {} bytes (crc32 {:08x})", info.target_size, info.target_checksum);
        println!("  Instructions: {}", instructions.len());
        print_manifest(&info.manifest);
    } else if raw.starts_with(BPM_MAGIC) {
        let file = multi_format::decode(&raw)?;
        println!("Multi-file patch: {}", path.display());
        for entry in &file.entries {
            println!("  {:?} {}", entry.op.tag(), entry.path);
        }
        print_manifest(&file.manifest);
    } else if raw.starts_with(BPA_MAGIC) {
        let archive = archive::decode(&raw)?;
        let summary = archive.summary();
        println!("Archive: {}", path.display());
        for entry in &archive.entries {
            match entry.contents {
                Some(contents) => println!("  {} ({} bytes)", entry.path, contents.len()),
                None => println!("  {}/", entry.path),
            }
        }
        println!("  Directories: {}", summary.dirs);
        println!("  Files: {} ({} bytes)", summary.files, summary.bytes);
        print_manifest(archive.manifest);
    } else {
        anyhow::bail!("{} is not a patch or archive", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let start = Instant::now();

    // Engine calls are blocking; each runs on a worker and reports once.
    match cli.command {
        Commands::Create {
            source,
            target,
            output,
            options,
        } => {
            let manifest = options.manifest()?;
            let mode = options.mode();
            let delta = options.delta_options();
            let patch = tokio::task::spawn_blocking(move || match mode {
                Mode::Linear => linear::create_file(&source, &target, &manifest),
                Mode::Delta => binary_diff::create_file(&source, &target, &manifest, &delta),
            })
            .await?
            .context("Patch creation failed")?;
            std::fs::write(&output, &patch)
                .with_context(|| format!("Failed to write patch: {}", output.display()))?;

            println!("Patch created successfully!");
            println!("  Mode: {:?}", mode);
            println!("  Patch: {} ({} bytes)", output.display(), patch.len());
        }
        Commands::Apply {
            patch,
            source,
            target,
        } => {
            let out = target.clone();
            let applied = tokio::task::spawn_blocking(move || {
                binary_patch::apply_file(&patch, &source, &out)
            })
            .await?
            .context("Patch application failed")?;

            println!("Patch applied successfully!");
            println!("  Target: {} ({} bytes)", target.display(), applied.target.len());
            print_manifest(&applied.manifest);
        }
        Commands::CreateMulti {
            source,
            target,
            output,
            options,
        } => {
            let manifest = options.manifest()?;
            let mode = options.mode();
            let delta = options.delta_options();
            let summary = tokio::task::spawn_blocking(move || {
                create::create_patch_with(&output, &source, &target, mode, &manifest, &delta)
            })
            .await?
            .context("Patch creation failed")?;

            println!("Patch created successfully!");
            println!("  Directories: {}", summary.paths_created);
            println!("  Files created: {}", summary.files_created);
            println!("  Files modified: {}", summary.files_modified);
            println!("  Files unchanged: {}", summary.files_mirrored);
            println!("  Files renamed: {}", summary.files_renamed);
            println!("  Paths deleted: {}", summary.paths_deleted);
        }
        Commands::ApplyMulti {
            patch,
            source,
            target,
        } => {
            let existed = target.exists();
            let out = target.clone();
            let result =
                tokio::task::spawn_blocking(move || apply::apply_patch(&patch, &source, &out)).await?;
            let applied = match result {
                Ok(applied) => applied,
                Err(err) => {
                    if !existed {
                        if let Err(cleanup) = std::fs::remove_dir_all(&target) {
                            warn!(
                                "Partially patched folder left at {}: {cleanup}",
                                target.display()
                            );
                        }
                    }
                    return Err(err).context("Patch application failed");
                }
            };

            println!("Patch applied successfully!");
            println!("  Directories: {}", applied.summary.paths_created);
            println!(
                "  Files written: {}",
                applied.summary.files_created
                    + applied.summary.files_modified
                    + applied.summary.files_mirrored
                    + applied.summary.files_renamed
            );
            println!("  Paths dropped: {}", applied.summary.paths_deleted);
            print_manifest(&applied.manifest);
        }
        Commands::Pack {
            source,
            output,
            manifest,
        } => {
            let manifest = read_manifest(manifest.as_deref())?;
            let summary =
                tokio::task::spawn_blocking(move || archive::create(&output, &source, &manifest))
                    .await?
                    .context("Archive creation failed")?;

            println!("Archive created successfully!");
            println!("  Directories: {}", summary.dirs);
            println!("  Files: {} ({} bytes)", summary.files, summary.bytes);
        }
        Commands::Unpack { archive: path, target } => {
            let unpacked = tokio::task::spawn_blocking(move || archive::unpack(&path, &target))
                .await?
                .context("Archive extraction failed")?;

            println!("Archive extracted successfully!");
            println!("  Directories: {}", unpacked.summary.dirs);
            println!("  Files: {} ({} bytes)", unpacked.summary.files, unpacked.summary.bytes);
            print_manifest(&unpacked.manifest);
        }
        Commands::Info { patch } => print_info(&patch)?,
    }

    println!("  Time elapsed: {:.3}s", start.elapsed().as_secs_f64());
    Ok(())
}
