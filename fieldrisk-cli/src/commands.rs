use crate::{Command, DraftCommand, FolderCommand};
use anyhow::{bail, Context};
use chrono::Utc;
use fieldrisk_sync::{
    JsonExportRenderer, Record, RecordStore, SaveOutcome, SyncEngine, SyncState,
};
use serde::Deserialize;
use std::path::Path;

/// Assessment as written by the wizard. `id` is present when re-saving an
/// existing assessment.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssessmentInput {
    id: Option<String>,
    name: String,
    activity: String,
    folder_id: String,
    #[serde(default)]
    payload: serde_json::Value,
}

pub async fn run(engine: &SyncEngine, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Save { file } => save(engine, &file).await,
        Command::List { folder } => list(engine, folder.as_deref()).await,
        Command::Sync => sync(engine).await,
        Command::Pending { push } => pending(engine, push).await,
        Command::Share {
            id,
            days,
            recipient,
        } => {
            let ticket = engine
                .shares()
                .share_stored_record(&id, days, recipient.as_deref())
                .await?;
            println!("Share id:       {}", ticket.share_id);
            println!("Encryption key: {}", ticket.encryption_key);
            println!("Expires:        {}", ticket.expires_at.to_rfc3339());
            println!("Send the id and the key separately.");
            Ok(())
        }
        Command::Redeem {
            share_id,
            key,
            folder,
        } => {
            let record = engine.shares().redeem_share(&share_id, &key, &folder).await?;
            println!(
                "Imported \"{}\" ({}) into folder {}",
                record.name,
                record.id,
                record.folder_id
            );
            Ok(())
        }
        Command::Export { id, out } => {
            let content = engine.coordinator().export(&id, &JsonExportRenderer).await?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &content.bytes)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Wrote {} ({})", path.display(), content.content_type);
                }
                None => println!("{}", String::from_utf8_lossy(&content.bytes)),
            }
            Ok(())
        }
        Command::Folder(folder) => run_folder(engine, folder).await,
        Command::Draft(draft) => run_draft(engine, draft).await,
        Command::DeviceId => {
            println!("{}", engine.device_id());
            Ok(())
        }
    }
}

async fn save(engine: &SyncEngine, file: &Path) -> anyhow::Result<()> {
    let input: AssessmentInput = read_json(file)?;
    let now = Utc::now();

    let existing = match &input.id {
        Some(id) => engine.local_db().get(id).await?,
        None => None,
    };

    let record = match existing {
        Some(mut record) => {
            record.rename(input.name, now);
            record.set_activity(input.activity, now);
            record.move_to_folder(input.folder_id, now);
            record.set_payload(input.payload, now);
            record
        }
        None => {
            let mut record = Record::new(
                input.name,
                input.activity,
                input.folder_id,
                input.payload,
                now,
            );
            if let Some(id) = input.id {
                record.id = id;
            }
            record
        }
    };

    let id = record.id.clone();
    match engine.coordinator().save_assessment(record).await? {
        SaveOutcome::Synced => println!("Saved {id} (backed up)"),
        SaveOutcome::LocalOnly => println!("Saved {id} (on this device only)"),
    }
    Ok(())
}

async fn list(engine: &SyncEngine, folder: Option<&str>) -> anyhow::Result<()> {
    let records = match folder {
        Some(folder) => engine.local_db().records_in_folder(folder).await?,
        None => engine.coordinator().refresh().await?,
    };

    if records.is_empty() {
        println!("No assessments");
        return Ok(());
    }
    for record in &records {
        print_record(record, record.persisted_sync_state());
    }
    Ok(())
}

async fn sync(engine: &SyncEngine) -> anyhow::Result<()> {
    let report = engine.coordinator().sync_with_remote().await?;
    if !report.online {
        println!("Remote unreachable; everything stays on this device");
        return Ok(());
    }
    println!(
        "Synced {} assessments ({} pulled, {} pushed){}",
        report.total,
        report.pulled,
        report.pushed,
        if report.confirmed { "" } else { "; upload not confirmed" }
    );
    Ok(())
}

async fn pending(engine: &SyncEngine, push: bool) -> anyhow::Result<()> {
    if push {
        let count = engine.coordinator().push_pending().await?;
        println!("Pushed {count} assessments");
    }

    let pending = engine.coordinator().pending_records().await?;
    if pending.is_empty() {
        println!("Nothing pending");
    }
    for record in &pending {
        print_record(record, SyncState::LocalOnly);
    }
    Ok(())
}

async fn run_folder(engine: &SyncEngine, command: FolderCommand) -> anyhow::Result<()> {
    let db = engine.local_db();
    match command {
        FolderCommand::Add { name } => {
            let folder = db.add_folder(&name).await?;
            println!("{}\t{}", folder.id, folder.name);
        }
        FolderCommand::List => {
            for folder in db.list_folders().await? {
                println!("{}\t{}", folder.id, folder.name);
            }
        }
        FolderCommand::Rename { id, name } => {
            let folder = db.rename_folder(&id, &name).await?;
            println!("{}\t{}", folder.id, folder.name);
        }
        FolderCommand::Delete { id } => {
            if !db.delete_folder(&id).await? {
                bail!("no folder with id {id}");
            }
            println!("Deleted folder {id}; its assessments were kept");
        }
    }
    Ok(())
}

async fn run_draft(engine: &SyncEngine, command: DraftCommand) -> anyhow::Result<()> {
    let db = engine.local_db();
    match command {
        DraftCommand::Save { file } => {
            let draft: serde_json::Value = read_json(&file)?;
            db.save_draft(&draft).await?;
            println!("Draft saved");
        }
        DraftCommand::Show => match db.load_draft().await? {
            Some(draft) => println!("{}", serde_json::to_string_pretty(&draft)?),
            None => println!("No draft"),
        },
        DraftCommand::Clear => {
            db.clear_draft().await?;
            println!("Draft cleared");
        }
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_record(record: &Record, state: SyncState) {
    println!(
        "{}\t{}\t{}\t{}\t{}",
        record.id,
        record.name,
        record.folder_id,
        record.updated_at.to_rfc3339(),
        state.as_str()
    );
}
