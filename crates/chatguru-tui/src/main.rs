use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatguru_core::Config;

mod app;
mod handler;
mod markdown;
mod tui;
mod ui;

#[cfg(test)]
mod testing;

use app::App;
use tui::EventHandler;

/// Log to a file next to the config; the terminal belongs to the UI.
fn init_logging() {
    let Ok(dir) = Config::config_dir() else {
        return;
    };
    if fs::create_dir_all(&dir).is_err() {
        return;
    }
    let Ok(file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("chatguru.log"))
    else {
        return;
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatguru=info,chatguru_core=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = Config::load().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "could not load config, using defaults");
        Config::default()
    });
    tracing::info!(model = config.model_name(), "starting ChatGuru");

    let mut app = App::new(config);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();

    let result = run(&mut terminal, &mut app, &mut events).await;

    app.shutdown();
    tui::restore()?;

    if let Err(err) = &result {
        tracing::error!(error = %err, "exited with error");
    }
    result
}

async fn run(terminal: &mut tui::Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        tokio::select! {
            event = events.next() => match event {
                Some(event) => {
                    handler::handle_event(app, event);
                    app.sync_session();
                }
                None => break,
            },
            joined = app::next_turn(&mut app.turn_task) => app.finish_turn(joined),
            changed = app.updates.changed() => {
                if changed.is_err() {
                    break;
                }
                app.on_session_update();
            }
        }
    }

    Ok(())
}
