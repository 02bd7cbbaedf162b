//! Terminal rendering: banner, selection listing and batch summaries.

use anyhow::Result;
use bytesize::ByteSize;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use console::{Term, style};
use figlet_rs::FIGfont;

use crate::config::APP_NAME;
use crate::types::{DecryptReport, EncryptReport, EntryKind, Removal, Restored, Target};

pub fn clear_screen() -> Result<()> {
    Term::stdout().clear_screen()?;
    Ok(())
}

/// Prints the application name in large letters, falling back to plain text.
pub fn print_banner() {
    let figure = FIGfont::standard().ok().and_then(|font| font.convert(APP_NAME).map(|figure| figure.to_string()));
    println!("{}", style(figure.unwrap_or_else(|| APP_NAME.to_owned())).green().bold());
}

fn table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn entry_size(target: &Target) -> String {
    match target.kind() {
        EntryKind::Directory => "folder".to_owned(),
        EntryKind::File => std::fs::metadata(target.path()).map_or_else(|_| "?".to_owned(), |m| ByteSize::b(m.len()).to_string()),
    }
}

/// Lists discovered targets with their position, name and size.
pub fn show_targets(targets: &[Target]) {
    if targets.is_empty() {
        println!("{}", style("Nothing eligible found").yellow());
        return;
    }

    let mut table = table();
    table.set_header(vec!["No", "Name", "Size"]);
    for (i, target) in targets.iter().enumerate() {
        let name = target.path().file_name().map_or_else(|| target.path().display().to_string(), |n| n.to_string_lossy().into_owned());
        table.add_row(vec![Cell::new(i + 1), Cell::new(name).fg(Color::Green), Cell::new(entry_size(target))]);
    }

    println!();
    println!("{} {}", style("✓").green(), style(format!("Found {} item(s):", targets.len())).bold());
    println!("{table}");
}

pub fn show_encrypt_report(report: &EncryptReport) {
    println!();
    println!("{} {}", style("✓").green(), style(format!("Encrypted to {}", report.artifact.display())).bold());
    println!("  {} item(s), {}, {} file(s) scrubbed", report.staged, ByteSize::b(report.artifact_size), report.scrubbed);

    if report.removals.is_empty() {
        return;
    }

    let mut table = table();
    table.set_header(vec!["Original", "Removal"]);
    for (path, removal) in &report.removals {
        let outcome = match removal {
            Removal::Shredded => Cell::new("shredded").fg(Color::Green),
            Removal::Unlinked => Cell::new("deleted without overwrite").fg(Color::Yellow),
            Removal::Tree => Cell::new("folder removed").fg(Color::Green),
            Removal::Failed(failure) => Cell::new(failure.error.user_message()).fg(Color::Red),
        };
        table.add_row(vec![Cell::new(path.display()), outcome]);
    }
    println!("{table}");
}

pub fn show_decrypt_report(report: &DecryptReport) {
    let mut table = table();
    table.set_header(vec!["Artifact", "Result"]);
    for item in &report.items {
        let outcome = match &item.result {
            Ok(Restored::File(path)) => Cell::new(format!("restored {}", path.display())).fg(Color::Green),
            Ok(Restored::Extracted { into, members }) => Cell::new(format!("{members} entries extracted into {}", into.display())).fg(Color::Green),
            Err(e) => Cell::new(e.user_message()).fg(Color::Red),
        };
        table.add_row(vec![Cell::new(item.target.display()), outcome]);
    }

    println!();
    println!("{table}");
    println!("{} succeeded, {} failed", style(report.succeeded()).green().bold(), style(report.failed()).red().bold());
}
