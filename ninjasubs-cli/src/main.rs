use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use ninjasubs_core::patcher::{check_capacity, derive_color_pointer};
use ninjasubs_core::scanner::scan_file;
use ninjasubs_core::settings::parse_hex_u32;
use ninjasubs_core::{
    assemble, export_project, parse_srt, validate_text, Entry, Project, Result, SubsError,
};

#[derive(Debug, Parser)]
#[command(
    name = "ninjasubs",
    version,
    about = "Compile subtitle projects into a game executable"
)]
struct Args {
    /// Log compiler and patcher details.
    #[arg(long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Look for known hooks in an executable.
    Scan {
        binary: PathBuf,
        #[arg(long, default_value = "0x8c010000")]
        base: String,
    },

    /// Start a project for an executable, pre-filled from a scan.
    New {
        binary: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },

    /// Replace a scene with the cues of an SRT file.
    ImportSrt {
        project: PathBuf,
        srt: PathBuf,
        #[arg(long, default_value_t = 0)]
        scene: u32,
        /// Answer yes to every question.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },

    /// Validate a project and report how much of the window it needs.
    Check { project: PathBuf },

    /// Compile the project and write it into the executable.
    Patch {
        project: PathBuf,
        /// Answer yes to every question.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

fn init_logging(verbose: bool) -> std::result::Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                message
            ))
        })
        .level(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .chain(io::stderr())
        .apply()?;
    Ok(())
}

fn ask(question: &str, assume_yes: bool) -> bool {
    if assume_yes {
        println!("{question} [y/N] y");
        return true;
    }
    print!("{question} [y/N] ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim(), "y" | "Y" | "yes"),
        Err(_) => false,
    }
}

fn scan(binary: &Path, base: &str) -> Result<()> {
    let report = scan_file(binary, parse_hex_u32("base", base)?)?;
    if report.is_empty() {
        println!("No patterns found in executable");
        return Ok(());
    }
    for (name, addr) in &report.hooks {
        println!("{name:<14} {addr:#010x}");
    }
    if let Some(argb) = report.default_color {
        println!("{:<14} {argb:08x}", "base color");
    }
    Ok(())
}

fn new_project(binary: &Path, out: &Path) -> Result<()> {
    let mut project = Project::new_with_binary(binary.to_string_lossy());
    let base = parse_hex_u32("executable_base_offset", &project.asm_settings.base_offset)?;
    let report = scan_file(binary, base)?;
    report.apply_to(&mut project.asm_settings);
    project.save(out)?;
    println!(
        "Created {} ({} hook(s) detected)",
        out.display(),
        report.hooks.len()
    );
    Ok(())
}

fn import_srt(project_path: &Path, srt: &Path, scene: u32, yes: bool) -> Result<()> {
    let mut project = Project::load(project_path)?;
    let content = std::fs::read_to_string(srt).map_err(SubsError::io(srt))?;
    let cues = parse_srt(&content);
    if cues.is_empty() {
        println!("No subtitles found in {}", srt.display());
        return Ok(());
    }

    if !project.scene(scene)?.is_empty()
        && !ask(&format!("Overwrite the {} entries of scene {scene}?", project.scene(scene)?.len()), yes)
    {
        println!("Import cancelled");
        return Ok(());
    }

    let count = cues.len();
    project.replace_scene(scene, cues.into_iter().map(Entry::from).collect())?;
    project.save(project_path)?;
    println!("Imported {count} subtitles into scene {scene}");
    Ok(())
}

fn check(project_path: &Path) -> Result<()> {
    let project = Project::load(project_path)?;

    let mut bad = 0usize;
    for (scene, entries) in &project.scenes {
        for (idx, entry) in entries.iter().enumerate() {
            if let Err(err) = validate_text(&entry.text) {
                println!("scene {scene} entry {idx}: {err}");
                bad += 1;
            }
        }
    }
    if bad > 0 {
        return Err(SubsError::Config(format!("{bad} entries need shorter lines")));
    }

    let cfg = project.asm_settings.resolve()?;
    // The pointer only changes header content, not the layout size.
    let color_pointer = std::fs::read(&cfg.binary_path)
        .ok()
        .and_then(|image| derive_color_pointer(&image, cfg.color_hook_file_offset().ok()?).ok())
        .unwrap_or(0);
    let blob = assemble(&project, &cfg, color_pointer)?;
    let available = cfg.available()?;
    println!(
        "{} scenes, blob {} bytes, window {} bytes ({} free)",
        project.scenes.len(),
        blob.len(),
        available,
        available as i64 - blob.len() as i64
    );
    check_capacity(blob.len(), cfg.empty_space_start, cfg.empty_space_end)?;
    Ok(())
}

fn patch(project_path: &Path, yes: bool) -> Result<()> {
    let project = Project::load(project_path)?;
    let mut confirm = |question: &str| ask(question, yes);
    let report = export_project(&project, &mut confirm)?;

    if let Some(fix) = report.glyph_fix {
        println!("{fix} applied");
    }
    if let Some(backup) = &report.backup {
        println!("Backup: {}", backup.display());
    }
    println!(
        "Successfully patched {} ({} of {} bytes used)",
        report.binary.display(),
        report.blob_len,
        report.available
    );
    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(err) = init_logging(args.verbose) {
        eprintln!("Failed to initialise logging: {err}");
    }

    let result = match &args.command {
        Command::Scan { binary, base } => scan(binary, base),
        Command::New { binary, out } => new_project(binary, out),
        Command::ImportSrt {
            project,
            srt,
            scene,
            yes,
        } => import_srt(project, srt, *scene, *yes),
        Command::Check { project } => check(project),
        Command::Patch { project, yes } => patch(project, *yes),
    };

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
