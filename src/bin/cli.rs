#![cfg(not(tarpaulin_include))]

use skills_feedback::config::AppConfig;
use skills_feedback::ledger::build_ledger;
use skills_feedback::loader::load_source;
use skills_feedback::review::{Agree, CurrentItem, ReviewSession, SourceRow};
use skills_feedback::submission::{RemoteOutcome, RespondentMetadata, SubmissionSink};
use std::env;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;

fn read_line(prompt: &str) -> io::Result<Option<String>> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn show_item(index: usize, total: usize, row: &SourceRow) {
    println!();
    println!("Item {} of {}", index + 1, total);
    println!("  Skill:            {}", row.skill);
    println!("  AI support:       {}", row.ai_support);
    println!("  Human capability: {}", row.human_capability);
}

fn print_help() {
    println!("Commands:");
    println!("  y: Agree with the human capability statement");
    println!("  n <revision>: Disagree and propose a revised statement");
    println!("  q: Quit without submitting");
}

/// Ask for the optional respondent details; blank answers stay empty
fn collect_metadata() -> io::Result<RespondentMetadata> {
    let mut metadata = RespondentMetadata::default();
    let fields: [(&str, &mut String); 10] = [
        ("Name", &mut metadata.name),
        ("Email", &mut metadata.email),
        ("Company size", &mut metadata.company_size),
        ("Role level", &mut metadata.role_level),
        ("Years of experience", &mut metadata.years_experience),
        ("Industry", &mut metadata.industry),
        ("Country", &mut metadata.country),
        ("City", &mut metadata.city),
        ("Age band", &mut metadata.age_band),
        ("Education", &mut metadata.education),
    ];
    println!();
    println!("All items reviewed. Tell us about yourself (press enter to skip).");
    for (label, slot) in fields {
        if let Some(answer) = read_line(&format!("{}: ", label))? {
            *slot = answer;
        }
    }
    Ok(metadata)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let s = Instant::now();
    let mut config = AppConfig::load()?;
    if let Some(path) = env::args().nth(1) {
        config.source.path = path.into();
    }
    config.validate()?;

    let items: Arc<[SourceRow]> = load_source(&config.source.path)?.into();
    let mut session =
        ReviewSession::new(items).require_revision(config.review.require_revision);
    let mut status = String::from("ok");
    let mut show = true;

    while let CurrentItem::Pending { index, row } = session.current() {
        if show {
            show_item(index, session.total(), row);
        }

        let Some(command) = read_line(&format!("({}) > ", status))? else {
            println!("Input closed; nothing was submitted.");
            return Ok(());
        };

        let (verb, rest) = match command.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (command.as_str(), ""),
        };

        if command.is_empty() {
            status = String::from("invalid command");
            show = false;
            continue;
        }
        if verb == "help" {
            print_help();
            show = false;
            continue;
        }
        if verb == "q" {
            println!("Review abandoned; nothing was submitted.");
            return Ok(());
        }

        match verb.parse::<Agree>() {
            Ok(agree) => match session.submit(agree, rest) {
                Ok(_) => {
                    status = String::from("ok");
                    show = true;
                }
                Err(e) => {
                    status = e.to_string();
                    show = false;
                }
            },
            Err(_) => {
                status = String::from("invalid command");
                show = false;
            }
        }
    }

    let metadata = collect_metadata()?;
    let ledger = build_ledger(&config.ledger)?;
    let sink = SubmissionSink::new(&config.export.path, ledger, &config.ledger.master_tab);
    let report = sink.persist(session.responses(), &metadata).await;

    match &report.local {
        Ok(path) => println!("Saved {} responses to {}", report.table.len(), path.display()),
        Err(e) => eprintln!("Error: {}", e),
    }
    match &report.remote {
        RemoteOutcome::Written { tabs, rows } => {
            println!("Appended {} rows to {}", rows, tabs.join(", "))
        }
        RemoteOutcome::Failed { .. } => {
            for warning in report.remote.warnings() {
                eprintln!("Warning: {}", warning);
            }
        }
        _ => {}
    }

    println!("Total elapsed time: {:.1} seconds", s.elapsed().as_secs_f64());
    Ok(())
}
