use crate::core::state::{
    group_voices_by_scene, EpisodeLength, HostCount, PodcastEntry, PodcastStatus, VoiceOption,
    WizardStep, PODCAST_TYPE_NEWS_TALK,
};
use crate::services::api::PodcastApi;
use crate::services::stream::{LogEntry, ScriptSession};
use crate::services::wizard::{Advance, GenerationOutcome, SubmitOutcome, Wizard};
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::error::InquireError;
use inquire::{Confirm, CustomType, Select, Text};
use log::{debug, warn};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

const MARKETPLACE_PAGE_SIZE: u32 = 10;

/// Interactive main menu. Returns when the user quits.
pub async fn run(wizard: &mut Wizard, api: &dyn PodcastApi) -> Result<()> {
    let interrupts = Interrupts::install();
    if let Err(e) = wizard.load_voices(api).await {
        warn!("Failed to fetch voice list: {:#}", e);
        println!("Could not load the voice list; voices can still be typed in by id.");
    }

    loop {
        let options = vec!["Create podcast", "My podcasts", "NFT marketplace", "Quit"];
        let Some(choice) = answer(Select::new("What would you like to do?", options).prompt())? else {
            return Ok(());
        };
        match choice {
            "Create podcast" => create_podcast(wizard, api, &interrupts).await?,
            "My podcasts" => my_podcasts(wizard, api).await?,
            "NFT marketplace" => marketplace(api).await?,
            _ => return Ok(()),
        }
    }
}

/// Maps Esc / Ctrl-C on a prompt to `None`.
fn answer<T>(result: Result<T, InquireError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(InquireError::OperationCanceled) | Err(InquireError::OperationInterrupted) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn show_error(wizard: &Wizard) {
    if let Some(error) = wizard.error() {
        println!("✗ {}", error);
    }
}

async fn create_podcast(wizard: &mut Wizard, api: &dyn PodcastApi, interrupts: &Interrupts) -> Result<()> {
    loop {
        println!("\n== {} ==", wizard.step());
        let keep_going = match wizard.step() {
            WizardStep::SelectType => select_type_step(wizard).await?,
            WizardStep::Configure => configure_step(wizard, api, interrupts).await?,
            WizardStep::ReviewAndGenerate => review_step(wizard, api, interrupts).await?,
        };
        if !keep_going {
            return Ok(());
        }
    }
}

async fn select_type_step(wizard: &mut Wizard) -> Result<bool> {
    let options = vec!["News & Talk", "Back to menu"];
    match answer(Select::new("Podcast type", options).prompt())? {
        Some("News & Talk") => {
            wizard.select_podcast_type(PODCAST_TYPE_NEWS_TALK);
            if let Advance::Blocked(_) = wizard.advance().await? {
                show_error(wizard);
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

async fn configure_step(wizard: &mut Wizard, api: &dyn PodcastApi, interrupts: &Interrupts) -> Result<bool> {
    if !edit_form(wizard)? {
        return Ok(false);
    }

    let options = vec!["Generate script", "Edit again", "Previous", "Back to menu"];
    match answer(Select::new("Next", options).prompt())? {
        Some("Generate script") => {
            // The step moves to 3 in the cache only once a script arrives.
            generate(wizard, api, interrupts).await?;
            Ok(true)
        }
        Some("Edit again") => Ok(true),
        Some("Previous") => {
            go_back(wizard).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Walks through every step-2 field with the current values as defaults.
/// Returns false when the user backs out.
fn edit_form(wizard: &mut Wizard) -> Result<bool> {
    let config = wizard.config().clone();

    let Some(link) = answer(
        Text::new("Web link (optional)")
            .with_initial_value(&config.web_link)
            .prompt(),
    )?
    else {
        return Ok(false);
    };
    wizard.set_web_link(link.trim());

    loop {
        let Some(text) = answer(
            Text::new("Custom text (optional)")
                .with_initial_value(&config.custom_text)
                .with_help_message("Up to 10,000 characters")
                .prompt(),
        )?
        else {
            return Ok(false);
        };
        match wizard.set_custom_text(text) {
            Ok(()) => break,
            Err(e) => println!("✗ {}", e),
        }
    }

    let Some(podcast_name) = answer(
        Text::new("Podcast name")
            .with_initial_value(&config.podcast_name)
            .prompt(),
    )?
    else {
        return Ok(false);
    };
    wizard.set_podcast_name(podcast_name);

    let Some(episode_name) = answer(
        Text::new("Episode name")
            .with_initial_value(&config.episode_name)
            .prompt(),
    )?
    else {
        return Ok(false);
    };
    wizard.set_episode_name(episode_name);

    let lengths = EpisodeLength::ALL.to_vec();
    let start = lengths.iter().position(|l| *l == config.duration).unwrap_or(0);
    let Some(duration) = answer(
        Select::new("Episode length", lengths)
            .with_starting_cursor(start)
            .prompt(),
    )?
    else {
        return Ok(false);
    };
    wizard.set_duration(duration);

    let counts = vec!["One host", "Two hosts"];
    let start = if config.host_count == HostCount::Two { 1 } else { 0 };
    let Some(count) = answer(
        Select::new("Hosts", counts)
            .with_starting_cursor(start)
            .prompt(),
    )?
    else {
        return Ok(false);
    };
    let count = if count == "Two hosts" { HostCount::Two } else { HostCount::One };
    wizard.set_host_count(count);

    let slots = match count {
        HostCount::One => 1,
        HostCount::Two => 2,
    };
    for index in 0..slots {
        let (name, voice) = if index == 0 {
            (&config.host1_name, &config.host1_voice)
        } else {
            (&config.host2_name, &config.host2_voice)
        };
        let label = format!("Host {}", index + 1);
        let Some(name) = answer(
            Text::new(&format!("{} name", label))
                .with_initial_value(name)
                .prompt(),
        )?
        else {
            return Ok(false);
        };
        let Some(voice) = pick_voice(&label, wizard.voices(), voice)? else {
            return Ok(false);
        };
        wizard.set_host(index, name, voice);
    }
    Ok(true)
}

/// Scene first, then the voice within it. Falls back to free text when the
/// catalogue is empty.
fn pick_voice(label: &str, voices: &[VoiceOption], current: &str) -> Result<Option<String>> {
    if voices.is_empty() {
        return answer(
            Text::new(&format!("{} voice id", label))
                .with_initial_value(current)
                .prompt(),
        );
    }

    let grouped = group_voices_by_scene(voices);
    let scenes: Vec<String> = grouped.keys().cloned().collect();
    let current_scene = voices
        .iter()
        .find(|v| v.voice_type == current)
        .map(|v| v.scene().to_string());
    let start = current_scene
        .and_then(|scene| scenes.iter().position(|s| *s == scene))
        .unwrap_or(0);

    let Some(scene) = answer(
        Select::new(&format!("{} voice scene", label), scenes)
            .with_starting_cursor(start)
            .prompt(),
    )?
    else {
        return Ok(None);
    };
    let Some(in_scene) = grouped.get(&scene) else {
        return Ok(None);
    };

    let names: Vec<String> = in_scene.iter().map(|v| v.short_name().to_string()).collect();
    let start = in_scene.iter().position(|v| v.voice_type == current).unwrap_or(0);
    let picked = answer(
        Select::new(&format!("{} voice", label), names)
            .with_starting_cursor(start)
            .raw_prompt(),
    )?;
    Ok(picked.and_then(|option| in_scene.get(option.index).map(|v| v.voice_type.clone())))
}

async fn review_step(wizard: &mut Wizard, api: &dyn PodcastApi, interrupts: &Interrupts) -> Result<bool> {
    let Some(script) = wizard.script() else {
        let options = vec!["Generate script", "Previous", "Back to menu"];
        return match answer(Select::new("No script yet", options).prompt())? {
            Some("Generate script") => {
                generate(wizard, api, interrupts).await?;
                Ok(true)
            }
            Some("Previous") => {
                go_back(wizard).await?;
                Ok(true)
            }
            _ => Ok(false),
        };
    };

    for (i, line) in script.contents.iter().enumerate() {
        println!("{:>3}. {}: {}", i + 1, line.speaker_name, line.content);
    }

    let options = vec![
        "Edit a line",
        "Show note & NFT",
        "Generate audio",
        "Regenerate script",
        "Previous",
        "Back to menu",
    ];
    match answer(Select::new("Script", options).prompt())? {
        Some("Edit a line") => edit_line(wizard).await?,
        Some("Show note & NFT") => edit_nft(wizard)?,
        Some("Generate audio") => submit(wizard, api).await?,
        Some("Regenerate script") => generate(wizard, api, interrupts).await?,
        Some("Previous") => {
            go_back(wizard).await?;
        }
        _ => return Ok(false),
    }
    Ok(true)
}

async fn edit_line(wizard: &mut Wizard) -> Result<()> {
    let Some(script) = wizard.script() else {
        return Ok(());
    };
    let labels: Vec<String> = script
        .contents
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{}. {}: {}", i + 1, line.speaker_name, line.content))
        .collect();
    let Some(picked) = answer(Select::new("Line to edit", labels).raw_prompt())? else {
        return Ok(());
    };
    let current = script
        .contents
        .get(picked.index)
        .map(|line| line.content.clone())
        .unwrap_or_default();

    let Some(content) = answer(
        Text::new("Content")
            .with_initial_value(&current)
            .with_help_message("Up to 200 characters")
            .prompt(),
    )?
    else {
        return Ok(());
    };
    if !wizard.edit_line(picked.index, &content).await? {
        println!("✗ Each dialog content cannot exceed 200 characters");
    }
    Ok(())
}

fn edit_nft(wizard: &mut Wizard) -> Result<()> {
    let nft = wizard.nft().clone();

    if let Some(note) = answer(
        Text::new("Show note")
            .with_initial_value(&nft.show_note)
            .prompt(),
    )? {
        wizard.set_show_note(note);
    }

    if let Some(supply) = answer(
        CustomType::<u64>::new("NFT supply")
            .with_default(nft.supply)
            .prompt(),
    )? {
        wizard.set_nft_supply(supply);
    }

    loop {
        let Some(price) = answer(
            Text::new("NFT price (SOL)")
                .with_initial_value(&nft.price_sol.to_string())
                .prompt(),
        )?
        else {
            return Ok(());
        };
        if wizard.set_nft_price_input(&price) {
            return Ok(());
        }
        println!("✗ Enter a non-negative number");
    }
}

async fn submit(wizard: &mut Wizard, api: &dyn PodcastApi) -> Result<()> {
    let confirmed = answer(
        Confirm::new("Submit this script for audio generation?")
            .with_default(true)
            .prompt(),
    )?;
    if confirmed != Some(true) {
        return Ok(());
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_message("Submitting audio generation...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));
    let outcome = wizard.submit_audio(api).await?;
    spinner.finish_and_clear();

    match outcome {
        SubmitOutcome::Submitted => {
            println!("✓ Audio generation started. Check \"My podcasts\" for progress.");
        }
        SubmitOutcome::Rejected(_) | SubmitOutcome::Failed => show_error(wizard),
    }
    Ok(())
}

/// Prints only the part of the progress log not shown yet. Entries only ever
/// grow at the end, so a byte offset into the last entry is enough.
#[derive(Debug, Default)]
struct LogPrinter {
    entry: usize,
    offset: usize,
}

impl LogPrinter {
    fn pending(&mut self, log: &[LogEntry]) -> String {
        let mut out = String::new();
        while let Some(current) = log.get(self.entry) {
            out.push_str(current.text.get(self.offset..).unwrap_or_default());
            if self.entry + 1 < log.len() {
                if !current.text.ends_with('\n') {
                    out.push('\n');
                }
                self.entry += 1;
                self.offset = 0;
            } else {
                self.offset = current.text.len();
                break;
            }
        }
        out
    }
}

async fn go_back(wizard: &mut Wizard) -> Result<()> {
    if let Some(previous) = wizard.step().previous() {
        wizard.retreat(previous).await?;
    }
    Ok(())
}

/// Routes Ctrl-C for the whole session. While a generation is armed the
/// signal cancels it; otherwise the process exits as it would by default.
#[derive(Clone, Default)]
struct Interrupts {
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl Interrupts {
    fn install() -> Self {
        let interrupts = Self::default();
        let router = interrupts.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !router.interrupt() {
                    std::process::exit(130);
                }
            }
        });
        interrupts
    }

    fn arm(&self, token: CancellationToken) {
        if let Ok(mut active) = self.active.lock() {
            *active = Some(token);
        }
    }

    fn disarm(&self) {
        if let Ok(mut active) = self.active.lock() {
            *active = None;
        }
    }

    /// Cancels the armed generation. Returns false when nothing was armed.
    fn interrupt(&self) -> bool {
        let armed = match self.active.lock() {
            Ok(mut active) => active.take(),
            Err(_) => None,
        };
        match armed {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

async fn generate(wizard: &mut Wizard, api: &dyn PodcastApi, interrupts: &Interrupts) -> Result<()> {
    let cancel = CancellationToken::new();
    interrupts.arm(cancel.clone());

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message("Ctrl-C to cancel");

    let mut printer = LogPrinter::default();
    let mut on_update = |session: &ScriptSession| {
        let text = printer.pending(session.progress_log());
        if !text.is_empty() {
            pb.suspend(|| {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            });
        }
        pb.set_position(session.progress() as u64);
    };

    let outcome = wizard.generate_script(api, cancel, &mut on_update).await;
    interrupts.disarm();
    pb.finish_and_clear();
    println!();

    match outcome? {
        GenerationOutcome::Completed => println!("✓ Script ready"),
        GenerationOutcome::Cancelled => println!("Generation cancelled"),
        other => {
            debug!("Generation ended with {:?}", other);
            show_error(wizard);
        }
    }
    Ok(())
}

fn status_label(status: PodcastStatus) -> &'static str {
    match status {
        PodcastStatus::Generating => "generating",
        PodcastStatus::Completed => "ready",
        PodcastStatus::Failed => "failed",
    }
}

fn podcast_label(entry: &PodcastEntry) -> String {
    format!(
        "{} / {} [{}] {}",
        entry.podcast_name,
        entry.episode_name,
        status_label(entry.status),
        entry.created_at
    )
}

async fn my_podcasts(wizard: &mut Wizard, api: &dyn PodcastApi) -> Result<()> {
    if !wizard.refresh_podcasts(api).await {
        println!("Could not refresh the podcast list, showing what is known locally.");
    }
    if wizard.podcasts().is_empty() {
        println!("No podcasts yet.");
        return Ok(());
    }

    let labels: Vec<String> = wizard.podcasts().iter().map(podcast_label).collect();
    let Some(picked) = answer(Select::new("My podcasts", labels).raw_prompt())? else {
        return Ok(());
    };
    if let Some(entry) = wizard.podcasts().get(picked.index) {
        println!("\n{} / {} (#{})", entry.podcast_name, entry.episode_name, entry.id);
        let hosts: Vec<&str> = entry.hosts.iter().map(|h| h.name.as_str()).collect();
        println!("Hosts: {}", hosts.join(", "));
        match &entry.audio_url {
            Some(url) if !url.is_empty() => println!("Audio: {}", url),
            _ => println!("Audio: {}", status_label(entry.status)),
        }
        if !entry.show_note.is_empty() {
            println!("Show note: {}", entry.show_note);
        }
        println!("NFT: {} at {} SOL", entry.nft_supply, entry.nft_price);
        println!("\n{}\n", entry.script);
    }
    Ok(())
}

async fn marketplace(api: &dyn PodcastApi) -> Result<()> {
    let mut page = 1u32;
    loop {
        let listing = match api.fetch_marketplace(page, MARKETPLACE_PAGE_SIZE).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!("Marketplace fetch failed: {:#}", e);
                println!("✗ Could not load the marketplace");
                return Ok(());
            }
        };
        if listing.list.is_empty() && page == 1 {
            println!("Nothing listed yet.");
            return Ok(());
        }

        let mut labels: Vec<String> = listing
            .list
            .iter()
            .map(|item| {
                format!(
                    "{} / {} - {} SOL ({}/{} sold)",
                    item.podcast_name, item.episode_name, item.nft_price, item.nft_sold, item.nft_supply
                )
            })
            .collect();
        let items = labels.len();
        let has_next = (page as u64) * (MARKETPLACE_PAGE_SIZE as u64) < listing.total;
        if has_next {
            labels.push("Next page".to_string());
        }
        if page > 1 {
            labels.push("Previous page".to_string());
        }
        labels.push("Back".to_string());

        let Some(picked) = answer(Select::new(&format!("Marketplace, page {}", page), labels).raw_prompt())? else {
            return Ok(());
        };
        match picked.value.as_str() {
            _ if picked.index < items => {
                if let Some(item) = listing.list.get(picked.index) {
                    show_nft(api, item.id).await;
                }
            }
            "Next page" => page += 1,
            "Previous page" => page -= 1,
            _ => return Ok(()),
        }
    }
}

async fn show_nft(api: &dyn PodcastApi, id: i64) {
    match api.fetch_nft_detail(id).await {
        Ok(detail) => {
            println!("\n{} / {}", detail.podcast_name, detail.episode_name);
            println!("Audio: {}", detail.audio_url);
            if !detail.show_note.is_empty() {
                println!("Show note: {}", detail.show_note);
            }
            println!(
                "Price: {} SOL, {} of {} left",
                detail.nft_price,
                detail.remaining(),
                detail.nft_supply
            );
            println!("Listed: {}\n", detail.created_at);
        }
        Err(e) => {
            warn!("NFT detail fetch failed: {:#}", e);
            println!("✗ Could not load this listing");
        }
    }
}
