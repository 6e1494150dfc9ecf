#[cfg(not(feature = "audio-cpal"))]
fn main() {
    eprintln!("the live demo requires the 'audio-cpal' feature");
    std::process::exit(1);
}

#[cfg(feature = "audio-cpal")]
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!("run with --help for usage");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args) {
        eprintln!("live capture failed: {e}");
        std::process::exit(1);
    }
}

#[cfg(feature = "audio-cpal")]
struct Args {
    mode: confab::SourceMode,
    seconds: u64,
    endpoint: Option<String>,
    transcriber: Option<std::path::PathBuf>,
    save: Option<std::path::PathBuf>,
}

#[cfg(feature = "audio-cpal")]
fn parse_args() -> Result<Args, String> {
    use confab::SourceMode;
    use std::path::PathBuf;

    let mut mode = SourceMode::Microphone;
    let mut seconds = 10u64;
    let mut endpoint: Option<String> = None;
    let mut transcriber: Option<PathBuf> = None;
    let mut save: Option<PathBuf> = None;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--mode" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --mode".into());
                };
                mode = match v.as_str() {
                    "mic" | "microphone" => SourceMode::Microphone,
                    "system" => SourceMode::System,
                    "both" => SourceMode::Both,
                    other => return Err(format!("unknown mode: {other}")),
                };
            }
            "--seconds" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --seconds".into());
                };
                seconds = v
                    .parse::<u64>()
                    .map_err(|_| "invalid value for --seconds".to_string())?
                    .clamp(1, 3600);
            }
            "--endpoint" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --endpoint".into());
                };
                endpoint = Some(v);
            }
            "--transcriber" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --transcriber".into());
                };
                transcriber = Some(PathBuf::from(v));
            }
            "--save" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --save".into());
                };
                save = Some(PathBuf::from(v));
            }
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run --bin live -- [--mode mic|system|both] [--seconds <n>] \\
  [--endpoint <url>] [--transcriber <path>] [--save <dir>]

Records for --seconds and prints segments as they commit. Without
--endpoint/--transcriber a deterministic stub backend is used."
                );
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    Ok(Args {
        mode,
        seconds,
        endpoint,
        transcriber,
        save,
    })
}

#[cfg(feature = "audio-cpal")]
fn run(args: Args) -> confab::Result<()> {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use confab::recognition::command::{CommandBackend, CommandBackendConfig};
    use confab::recognition::http::{HttpBackend, HttpBackendConfig};
    use confab::recognition::stub::StubBackend;
    use confab::recognition::RecognitionBackend;
    use confab::{CpalCatalog, SessionConfig, SessionController, TranscriptStore};

    let primary: Arc<dyn RecognitionBackend> = match &args.endpoint {
        Some(endpoint) => Arc::new(HttpBackend::new(HttpBackendConfig::new(endpoint.clone()))?),
        None => Arc::new(StubBackend::new()),
    };
    let fallback: Arc<dyn RecognitionBackend> = match &args.transcriber {
        Some(program) => Arc::new(CommandBackend::new(CommandBackendConfig::new(
            program.clone(),
        ))),
        None => Arc::new(StubBackend::new()),
    };

    let controller = SessionController::new(
        SessionConfig::default(),
        Box::new(CpalCatalog),
        primary,
        fallback,
    );

    let mut segments_rx = controller.subscribe_transcript();
    let handle = controller.start(args.mode)?;

    let selection = handle.device_selection();
    if let Some(warning) = selection.degradation {
        eprintln!("warning: {warning:?} — capturing from the default input instead");
    }
    println!(
        "recording from '{}' ({} ch) for {} s…",
        selection.device_name, selection.channel_count, args.seconds
    );

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    while Instant::now() < deadline {
        while let Ok(segment) = segments_rx.try_recv() {
            println!("[{:>4}] {}", segment.seq, segment.text);
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    let transcript = controller.stop(&handle)?;
    while let Ok(segment) = segments_rx.try_recv() {
        println!("[{:>4}] {}", segment.seq, segment.text);
    }

    println!();
    println!("{}", transcript.text());
    println!(
        "{} words, {} chars, {} frames dropped",
        transcript.word_count(),
        transcript.char_count(),
        transcript.dropped_frames
    );

    if let Some(dir) = args.save {
        let path = TranscriptStore::new(dir).save_text(&transcript)?;
        println!("saved to {}", path.display());
    }
    Ok(())
}
