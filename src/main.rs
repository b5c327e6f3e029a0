use std::process::ExitCode;

mod app;
mod config;
mod geometry;
mod media;
mod observer;
mod playback;
mod scenario;
mod session;
mod tracker;
mod utils;
mod viewport;

fn main() -> ExitCode {
    let result = app::start();
    match result {
        Ok(..) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:?}");
            ExitCode::FAILURE
        }
    }
}
