mod config;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use config::Config;
use rollcall_core::photo::is_photo_file;
use rollcall_core::{
    AttendanceRequest, AttendanceStatus, AttendanceTaker, DistanceMetric, FaceBackend, MatchPolicy,
    OnnxBackend, PersonId, PhotoSource, Reconciler, ReferenceFacePolicy, SessionId,
    SignatureExtractor,
};
use rollcall_store::{NewPerson, PersonUpdate, SqliteStore};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Take class attendance from a group photo")]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Flags that take precedence over the config file and `ROLLCALL_*`.
#[derive(Args)]
struct Overrides {
    /// TOML config file (default: $ROLLCALL_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Directory holding det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
    /// Directory reports are written to
    #[arg(long, global = true)]
    report_dir: Option<PathBuf>,
    /// Largest face distance counted as a match
    #[arg(long, global = true)]
    tolerance: Option<f32>,
    /// Distance metric: euclidean or cosine
    #[arg(long, global = true)]
    metric: Option<DistanceMetric>,
    /// Match policy: any or nearest
    #[arg(long, global = true)]
    policy: Option<MatchPolicy>,
    /// Reference photos with several faces: first, reject or all
    #[arg(long, global = true)]
    reference_faces: Option<ReferenceFacePolicy>,
}

impl Overrides {
    fn apply(&self, cfg: &mut Config) {
        if let Some(db) = &self.db {
            cfg.db_path = db.clone();
        }
        if let Some(dir) = &self.model_dir {
            cfg.model_dir = dir.clone();
        }
        if let Some(dir) = &self.report_dir {
            cfg.report_dir = dir.clone();
        }
        if let Some(t) = self.tolerance {
            cfg.tolerance = t;
        }
        if let Some(m) = self.metric {
            cfg.metric = m;
        }
        if let Some(p) = self.policy {
            cfg.match_policy = p;
        }
        if let Some(r) = self.reference_faces {
            cfg.reference_faces = r;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Take attendance for a class from one group photo
    Take {
        /// Session label (e.g., "Lecture 4")
        #[arg(short, long)]
        session: String,
        /// Class whose roster is checked
        #[arg(short, long)]
        class: String,
        /// Group photo (JPEG/PNG), or "-" to read it from stdin
        #[arg(short, long)]
        photo: PathBuf,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a person to a class roster
    Enroll {
        #[arg(short, long)]
        name: String,
        /// Roll number (unique)
        #[arg(short, long)]
        roll: String,
        #[arg(short, long)]
        class: String,
        /// Folder of reference photos of this person
        #[arg(short, long)]
        images: Option<PathBuf>,
    },
    /// Change an enrolled person's details, keeping their history
    Edit {
        /// Person ID to change
        id: PersonId,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        roll: Option<String>,
        #[arg(short, long)]
        class: Option<String>,
        /// New folder of reference photos
        #[arg(short, long)]
        images: Option<PathBuf>,
    },
    /// List enrolled people
    People {
        #[arg(short, long)]
        class: Option<String>,
    },
    /// Remove a person and their attendance records
    Remove {
        /// Person ID to remove
        id: PersonId,
    },
    /// List attendance sessions
    Sessions {
        /// Only sessions that have no records
        #[arg(long)]
        orphans: bool,
    },
    /// Show the records of one session
    Records { session: SessionId },
    /// Show one person's attendance history
    History { person: PersonId },
    /// Run face detection on one image and report what was found
    Inspect { image: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut cfg = Config::load(cli.overrides.config.as_deref())?;
    cli.overrides.apply(&mut cfg);
    tracing::debug!(?cfg, "configuration resolved");

    match cli.command {
        Commands::Take {
            session,
            class,
            photo,
            json,
        } => take(&cfg, session, class, &photo, json),
        Commands::Enroll {
            name,
            roll,
            class,
            images,
        } => enroll(&cfg, name, roll, class, images),
        Commands::Edit {
            id,
            name,
            roll,
            class,
            images,
        } => edit(
            &cfg,
            id,
            PersonUpdate {
                name,
                roll_no: roll,
                class_label: class,
                images_dir: images,
            },
        ),
        Commands::People { class } => {
            let people = open_store(&cfg)?.list_people(class.as_deref())?;
            if people.is_empty() {
                println!("No people enrolled");
            }
            for p in people {
                println!("{:>5}  {:<12} {:<10} {}", p.id, p.roll_no, p.class_label, p.name);
            }
            Ok(())
        }
        Commands::Remove { id } => {
            if open_store(&cfg)?.remove_person(id)? {
                println!("Removed person {id}");
                Ok(())
            } else {
                bail!("no person with id {id}")
            }
        }
        Commands::Sessions { orphans } => sessions(&cfg, orphans),
        Commands::Records { session } => {
            let store = open_store(&cfg)?;
            let info = store.get_session(session)?;
            println!("{} / {} ({})", info.name, info.class_label, info.created_at.to_rfc3339());
            for row in store.records_for_session(session)? {
                println!("{:>5}  {:<12} {:<8} {}", row.person_id, row.roll_no, row.status, row.name);
            }
            Ok(())
        }
        Commands::History { person } => history(&cfg, person),
        Commands::Inspect { image } => inspect(&cfg, &image),
    }
}

fn open_store(cfg: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&cfg.db_path)
        .with_context(|| format!("opening database {}", cfg.db_path.display()))
}

fn load_backend(cfg: &Config) -> Result<OnnxBackend> {
    OnnxBackend::load(&cfg.model_dir, cfg.detection_confidence)
        .with_context(|| format!("loading face models from {}", cfg.model_dir.display()))
}

fn photo_source(path: &Path) -> Result<PhotoSource> {
    if path.as_os_str() == "-" {
        let mut data = Vec::new();
        std::io::stdin()
            .read_to_end(&mut data)
            .context("reading photo from stdin")?;
        return Ok(PhotoSource::Bytes {
            label: "<stdin>".into(),
            data,
        });
    }
    Ok(PhotoSource::Path(path.to_path_buf()))
}

#[derive(Serialize)]
struct TakeSummary {
    session_id: SessionId,
    session: String,
    class: String,
    report: PathBuf,
    group_faces: usize,
    present: Vec<PersonLine>,
    absent: Vec<PersonLine>,
    /// People with no usable reference photo; not checked when the photo
    /// has no faces.
    unmatchable: Vec<PersonId>,
}

#[derive(Serialize)]
struct PersonLine {
    id: PersonId,
    name: String,
    roll_no: String,
}

fn take(cfg: &Config, session: String, class: String, photo: &Path, json: bool) -> Result<()> {
    let mut store = open_store(cfg)?;
    let extractor = SignatureExtractor::new(load_backend(cfg)?, cfg.extractor_config());
    let mut taker = AttendanceTaker::new(
        Reconciler::new(extractor, cfg.match_config()),
        &cfg.report_dir,
    );

    let request = AttendanceRequest {
        session_name: session,
        class_label: class,
        photo: photo_source(photo)?,
    };
    let outcome = taker.take(&mut store, &request)?;

    let mut summary = TakeSummary {
        session_id: outcome.session.id,
        session: outcome.session.name.clone(),
        class: outcome.session.class_label.clone(),
        report: outcome.report_path.clone(),
        group_faces: outcome.reconciliation.group_faces,
        present: Vec::new(),
        absent: Vec::new(),
        unmatchable: outcome.reconciliation.unmatchable.clone(),
    };
    for row in store.records_for_session(outcome.session.id)? {
        let line = PersonLine {
            id: row.person_id,
            name: row.name,
            roll_no: row.roll_no,
        };
        match row.status {
            AttendanceStatus::Present => summary.present.push(line),
            AttendanceStatus::Absent => summary.absent.push(line),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "Session {} \"{}\" for {}: {} face(s) in photo",
        summary.session_id, summary.session, summary.class, summary.group_faces
    );
    println!("Present ({}):", summary.present.len());
    for p in &summary.present {
        println!("  {:<12} {}", p.roll_no, p.name);
    }
    println!("Absent ({}):", summary.absent.len());
    for p in &summary.absent {
        let note = if summary.unmatchable.contains(&p.id) {
            "  (no usable reference photo)"
        } else {
            ""
        };
        println!("  {:<12} {}{note}", p.roll_no, p.name);
    }
    if summary.group_faces == 0 {
        println!("No faces found; reference photos were not checked");
    }
    println!("Report: {}", summary.report.display());
    Ok(())
}

fn enroll(
    cfg: &Config,
    name: String,
    roll_no: String,
    class_label: String,
    images: Option<PathBuf>,
) -> Result<()> {
    let images = images.as_deref().map(images_dir).transpose()?;
    let store = open_store(cfg)?;
    let id = store.add_person(&NewPerson {
        name: name.clone(),
        roll_no,
        class_label: class_label.clone(),
        images_dir: images,
    })?;
    println!("Enrolled {name} in {class_label} (ID: {id})");
    Ok(())
}

fn edit(cfg: &Config, id: PersonId, mut update: PersonUpdate) -> Result<()> {
    if update.is_empty() {
        bail!("nothing to change; pass --name, --roll, --class or --images");
    }
    update.images_dir = update.images_dir.as_deref().map(images_dir).transpose()?;
    if open_store(cfg)?.update_person(id, &update)? {
        println!("Updated person {id}");
        Ok(())
    } else {
        bail!("no person with id {id}")
    }
}

/// Absolute form of a reference folder, so `take` finds it from any directory.
fn images_dir(dir: &Path) -> Result<PathBuf> {
    if !dir.is_dir() {
        bail!("image folder {} does not exist", dir.display());
    }
    let dir = std::fs::canonicalize(dir)
        .with_context(|| format!("resolving {}", dir.display()))?;
    let photos = std::fs::read_dir(&dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| is_photo_file(&e.path()))
        .count();
    if photos == 0 {
        tracing::warn!(dir = %dir.display(), "no JPEG/PNG photos in image folder; person will always be Absent");
    }
    Ok(dir)
}

fn sessions(cfg: &Config, orphans_only: bool) -> Result<()> {
    let store = open_store(cfg)?;
    let summaries = store.list_sessions()?;
    let mut shown = 0;
    for s in summaries.iter().filter(|s| !orphans_only || s.is_orphaned()) {
        shown += 1;
        println!(
            "{:>5}  {}  {:<10} {:<20} present {:>3}  absent {:>3}{}",
            s.session.id,
            s.session.created_at.format("%Y-%m-%d %H:%M"),
            s.session.class_label,
            s.session.name,
            s.present,
            s.absent,
            if s.is_orphaned() { "  [no records]" } else { "" },
        );
    }
    if shown == 0 {
        println!("No sessions");
    }
    Ok(())
}

fn history(cfg: &Config, person: PersonId) -> Result<()> {
    let store = open_store(cfg)?;
    let entries = store.records_for_person(person)?;
    if entries.is_empty() {
        println!("No attendance recorded for person {person}");
        return Ok(());
    }
    for e in &entries {
        println!(
            "{}  {:<10} {:<20} {}",
            e.session.created_at.format("%Y-%m-%d"),
            e.session.class_label,
            e.session.name,
            e.status
        );
    }
    let present = entries
        .iter()
        .filter(|e| e.status == AttendanceStatus::Present)
        .count();
    println!(
        "Attended {present}/{} sessions on roster ({:.1}%)",
        entries.len(),
        attendance_percentage(present, entries.len())
    );
    Ok(())
}

fn attendance_percentage(present: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    present as f64 * 100.0 / total as f64
}

fn inspect(cfg: &Config, image: &Path) -> Result<()> {
    let rgb = photo_source(image)?.load()?;
    let mut backend = load_backend(cfg)?;
    let faces = backend.detect_and_encode(&rgb, cfg.max_faces_per_image.max(1))?;
    println!(
        "{}: {}x{}, {} face(s) via {}",
        image.display(),
        rgb.width(),
        rgb.height(),
        faces.len(),
        backend.name()
    );
    for (i, f) in faces.iter().enumerate() {
        println!(
            "  #{i}  box ({:.0}, {:.0}) {:.0}x{:.0}  confidence {:.2}",
            f.bbox.x, f.bbox.y, f.bbox.width, f.bbox.height, f.bbox.confidence
        );
    }
    Ok(())
}
