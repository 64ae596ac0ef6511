use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use subtitle_scout::download::EpisodeTarget;
use subtitle_scout::file_resolver::{VideoFile, scan_for_videos};
use subtitle_scout::providers::{ProviderError, SubtitleCandidate};
use subtitle_scout::settings::{JsonFileSettings, Settings, SourceToggle};
use subtitle_scout::{AutoMatch, AutoMatchOptions, ProgressEvent, Services, file_hash, filename_parser};
use tracing_subscriber::EnvFilter;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Find, rank and fetch subtitles for local video files
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Settings file to use instead of the one in the config directory
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Increase log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Search subtitles by title and pick one interactively
    Search {
        /// Title or filename, e.g. "The Wire S03E11"
        query: String,
        #[arg(long)]
        season: Option<u32>,
        #[arg(long)]
        episode: Option<u32>,
        /// Language code; defaults to the preferred language
        #[arg(short, long)]
        language: Option<String>,
        /// Provider ids to search (repeatable)
        #[arg(short, long = "provider")]
        providers: Vec<String>,
        /// Where to save the subtitle; defaults to the download directory
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Only list the results
        #[arg(long)]
        list: bool,
    },

    /// Find and install the best subtitle for a video or every video in a directory
    Auto {
        path: PathBuf,
        #[arg(short, long)]
        language: Option<String>,
        #[arg(short, long = "provider")]
        providers: Vec<String>,
        /// Also write a copy of the video with the subtitle embedded
        #[arg(long)]
        merge: Option<PathBuf>,
        /// Process videos that already have a subtitle
        #[arg(long)]
        force: bool,
    },

    /// Print the content hash of a video
    Hash { video: PathBuf },

    /// Show what is parsed from a filename
    Parse { filename: String },

    /// Embed a subtitle into a copy of a video
    Merge {
        video: PathBuf,
        subtitle: PathBuf,
        output: PathBuf,
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Read or change settings
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Inspect or clear the metadata cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print one setting
    Get { key: String },
    /// Store a setting
    Set { key: String, value: String },
    /// Print all settings, credentials masked
    List,
    /// Enable or disable subtitle providers
    Sources {
        #[arg(long)]
        enable: Vec<String>,
        #[arg(long)]
        disable: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
enum CacheCommand {
    Stats,
    Clear,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "subtitle_scout=warn",
        1 => "subtitle_scout=info",
        _ => "subtitle_scout=debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

/// Handles progress events and prints formatted output to stdout
fn handle_progress_event(event: ProgressEvent) {
    match event {
        ProgressEvent::Hashing { video_path } => {
            println!("Hashing {}...", video_path.display());
        }
        ProgressEvent::SearchingByHash { hash } => {
            println!("  Searching by hash {}...", hash);
        }
        ProgressEvent::ResolvingMetadata { title } => {
            println!("  No hash match, looking up '{}'...", title);
        }
        ProgressEvent::MetadataResolved { identity } => match identity {
            Some(identity) => println!(
                "  Identified as {} ({}){}",
                identity.title,
                identity
                    .year
                    .map(|y| y.to_string())
                    .unwrap_or_else(|| "?".to_string()),
                if identity.is_anime { " [anime]" } else { "" }
            ),
            None => println!("  No metadata found, searching by raw title"),
        },
        ProgressEvent::SearchingByText { query } => {
            println!("  Searching for '{}'...", query);
        }
        ProgressEvent::CandidatesFound { count, by_hash } => {
            let how = if by_hash { "by hash" } else { "by title" };
            println!("  Found {} candidate(s) {}", count, how);
        }
        ProgressEvent::Selected { candidate } => {
            println!("  Selected: {}", describe(&candidate));
        }
        ProgressEvent::Downloading { .. } => {
            println!("  Downloading...");
        }
        ProgressEvent::Downloaded { path } => {
            println!("  Saved {}", path.display());
        }
        ProgressEvent::Merging { output } => {
            println!("  Merging into {}...", output.display());
        }
        ProgressEvent::MergeProgress { percent } => {
            if percent % 10 == 0 {
                println!("    {}%", percent);
            }
        }
    }
}

fn describe(candidate: &SubtitleCandidate) -> String {
    let mut label = format!(
        "[{}] {} ({}, {}, {:.1}★, {} downloads)",
        candidate.source,
        candidate.filename,
        candidate.language,
        candidate.format,
        candidate.rating,
        candidate.downloads
    );
    if candidate.hearing_impaired {
        label.push_str(" [HI]");
    }
    if let Some(owner) = &candidate.owner {
        label.push_str(&format!(" by {}", owner));
    }
    label
}

fn print_configuration_hint(issues: &[ProviderError]) {
    for issue in issues {
        eprintln!("  {}", issue);
    }
    if !issues.is_empty() {
        eprintln!("Check your settings with `subtitle_scout config list`.");
    }
}

fn open_settings(path: Option<&Path>) -> Result<Settings, Box<dyn std::error::Error>> {
    let store = match path {
        Some(path) => JsonFileSettings::open(path)?,
        None => JsonFileSettings::open_default()?,
    };
    Ok(Settings::new(Arc::new(store)))
}

fn provider_filter(providers: &[String]) -> Option<&[String]> {
    (!providers.is_empty()).then_some(providers)
}

async fn search(
    services: &Services,
    query: &str,
    target: EpisodeTarget,
    language: Option<&str>,
    providers: &[String],
    output: Option<&Path>,
    list_only: bool,
) -> CliResult {
    let candidates = services
        .search_subtitles(query, target, language, provider_filter(providers))
        .await;

    if candidates.is_empty() {
        println!("No subtitles found.");
        let enabled = services
            .registry
            .enabled_ids(provider_filter(providers), subtitle_scout::providers::DEFAULT_TEXT_PROVIDERS);
        print_configuration_hint(&services.registry.configuration_issues(&enabled));
        return Ok(());
    }

    let labels: Vec<String> = candidates.iter().map(describe).collect();
    if list_only {
        for (index, label) in labels.iter().enumerate() {
            println!("{:>3}. {}", index + 1, label);
        }
        return Ok(());
    }

    let Some(choice) = dialoguer::Select::new()
        .with_prompt(format!("{} subtitle(s) found, pick one", candidates.len()))
        .items(&labels)
        .default(0)
        .interact_opt()?
    else {
        println!("Nothing downloaded.");
        return Ok(());
    };

    let parsed = filename_parser::parse(query);
    let target = EpisodeTarget {
        season: target.season.or(parsed.season),
        episode: target.episode.or(parsed.episode),
    };
    let path = services
        .download(&candidates[choice], output, target)
        .await?;
    println!("Saved {}", path.display());
    Ok(())
}

async fn auto(
    services: &Services,
    path: &Path,
    options: AutoMatchOptions,
    force: bool,
) -> CliResult {
    let videos = if path.is_dir() {
        if options.merge_into.is_some() {
            return Err("--merge needs a single video, not a directory".into());
        }
        let videos = scan_for_videos(path)?;
        println!("Found {} video file(s)\n", videos.len());
        videos
    } else {
        vec![VideoFile::new(path)]
    };

    let total = videos.len();
    let mut installed = 0;
    for (index, video) in videos.iter().enumerate() {
        let size = std::fs::metadata(&video.path)
            .map(|m| humansize::format_size(m.len(), humansize::DECIMAL))
            .unwrap_or_default();
        println!("[{}/{}] {} ({})", index + 1, total, video.path.display(), size);

        if !force && video.has_subtitle() {
            println!("  Subtitle already present, skipping");
            continue;
        }

        // One batch entry failing does not stop the others
        match services
            .auto_match(&video.path, options.clone(), handle_progress_event)
            .await
        {
            Ok(AutoMatch::Installed { .. }) => installed += 1,
            Ok(AutoMatch::NotFound {
                configuration_issues,
            }) => {
                println!("  No subtitles found.");
                print_configuration_hint(&configuration_issues);
            }
            Err(e) if total > 1 => eprintln!("  Error: {}", e),
            Err(e) => return Err(e.into()),
        }
    }

    if total > 1 {
        println!("\nInstalled subtitles for {} of {} video(s).", installed, total);
    }
    Ok(())
}

fn mask(key: &str, value: &serde_json::Value) -> String {
    let secret = key.ends_with("_api_key") || key.ends_with("_password");
    match value {
        serde_json::Value::String(s) if secret && !s.is_empty() => "********".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn config(settings: &Settings, command: ConfigCommand) -> CliResult {
    match command {
        ConfigCommand::Get { key } => match settings.value(&key) {
            Some(value) => println!("{}", mask("", &value)),
            None => println!("{} is not set", key),
        },
        ConfigCommand::Set { key, value } => {
            settings.set_string(&key, &value)?;
            println!("{} updated", key);
        }
        ConfigCommand::List => {
            let mut keys = settings.store().keys()?;
            keys.sort();
            for key in keys {
                if key == subtitle_scout::settings::KEY_METADATA_CACHE {
                    continue;
                }
                if let Some(value) = settings.value(&key) {
                    println!("{} = {}", key, mask(&key, &value));
                }
            }
        }
        ConfigCommand::Sources { enable, disable } => {
            let mut sources = settings.subtitle_sources().unwrap_or_else(|| {
                subtitle_scout::providers::DEFAULT_TEXT_PROVIDERS
                    .iter()
                    .map(|id| SourceToggle {
                        id: id.to_string(),
                        enabled: true,
                    })
                    .collect()
            });

            for (ids, enabled) in [(enable, true), (disable, false)] {
                for id in ids {
                    match sources.iter_mut().find(|s| s.id == id) {
                        Some(source) => source.enabled = enabled,
                        None => sources.push(SourceToggle { id, enabled }),
                    }
                }
            }
            settings.set_subtitle_sources(&sources)?;

            for source in &sources {
                let mark = if source.enabled { "x" } else { " " };
                println!("[{}] {}", mark, source.id);
            }
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> CliResult {
    let settings = open_settings(cli.settings.as_deref())?;

    match cli.command {
        Command::Parse { filename } => {
            let parsed = filename_parser::parse(&filename);
            println!("{}", serde_json::to_string_pretty(&parsed)?);
        }
        Command::Hash { video } => {
            println!("{}", file_hash::hash_video(&video).await?);
        }
        Command::Config(command) => config(&settings, command)?,
        Command::Cache(command) => {
            let services = Services::new(settings)?;
            match command {
                CacheCommand::Stats => {
                    let stats = services.cache.stats()?;
                    println!("{} cached identities, {} expired", stats.total, stats.expired);
                }
                CacheCommand::Clear => {
                    services.cache.clear()?;
                    println!("Metadata cache cleared");
                }
            }
        }
        Command::Search {
            query,
            season,
            episode,
            language,
            providers,
            output,
            list,
        } => {
            let services = Services::new(settings)?;
            let target = EpisodeTarget { season, episode };
            search(
                &services,
                &query,
                target,
                language.as_deref(),
                &providers,
                output.as_deref(),
                list,
            )
            .await?;
        }
        Command::Auto {
            path,
            language,
            providers,
            merge,
            force,
        } => {
            let services = Services::new(settings)?;
            let options = AutoMatchOptions {
                language,
                providers: (!providers.is_empty()).then_some(providers),
                merge_into: merge,
            };
            auto(&services, &path, options, force).await?;
        }
        Command::Merge {
            video,
            subtitle,
            output,
            language,
        } => {
            let services = Services::new(settings)?;
            services
                .merge(&video, &subtitle, &output, language.as_deref(), |percent| {
                    if percent % 10 == 0 {
                        println!("  {}%", percent);
                    }
                })
                .await?;
            println!("Wrote {}", output.display());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
