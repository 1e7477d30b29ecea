use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use flipbook::{
    DecodeWorker, FrameBuffer, HeapPool, LoopPolicy, PlaybackConfig, PlaybackController,
};

/// Longest wait between render passes when no deadline is pending.
const IDLE_POLL: Duration = Duration::from_millis(100);

struct Options {
    path: PathBuf,
    loop_policy: Option<LoopPolicy>,
    dump_dir: Option<PathBuf>,
    max_secs: f64,
    save_config: bool,
}

fn usage() -> &'static str {
    "usage: flipbook <file.gif|file.webp> [--once | --infinite | --loops N] [--dump DIR] [--seconds N] [--save-config]"
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options> {
    let mut path = None;
    let mut loop_policy = None;
    let mut dump_dir = None;
    let mut max_secs = 10.0;
    let mut save_config = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--once" => loop_policy = Some(LoopPolicy::Once),
            "--infinite" => loop_policy = Some(LoopPolicy::Infinite),
            "--loops" => {
                let n: u32 = args
                    .next()
                    .context("--loops needs a count")?
                    .parse()
                    .context("--loops count must be a number")?;
                loop_policy = Some(LoopPolicy::Finite(n));
            }
            "--dump" => dump_dir = Some(PathBuf::from(args.next().context("--dump needs a directory")?)),
            "--seconds" => {
                max_secs = args
                    .next()
                    .context("--seconds needs a value")?
                    .parse()
                    .context("--seconds must be a number")?;
            }
            "--save-config" => save_config = true,
            "-h" | "--help" => {
                println!("{}", usage());
                std::process::exit(0);
            }
            other if other.starts_with('-') => bail!("unknown option {other}\n{}", usage()),
            other => path = Some(PathBuf::from(other)),
        }
    }

    let Some(path) = path else {
        bail!("{}", usage());
    };
    Ok(Options {
        path,
        loop_policy,
        dump_dir,
        max_secs,
        save_config,
    })
}

fn save_frame(dir: &std::path::Path, index: u64, frame: &FrameBuffer, w: u32, h: u32) -> Result<()> {
    let mut pixels = Vec::with_capacity(w as usize * h as usize * 4);
    for y in 0..h {
        pixels.extend_from_slice(&frame.row(y)[..w as usize * 4]);
    }
    let img = image::RgbaImage::from_raw(w, h, pixels).context("frame buffer size mismatch")?;
    let path = dir.join(format!("frame_{index:05}.png"));
    img.save(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let opts = parse_args(std::env::args().skip(1))?;
    let mut config = PlaybackConfig::load();
    if let Some(policy) = opts.loop_policy {
        config.loop_policy = policy;
    }
    if opts.save_config {
        config.save();
    }
    if let Some(dir) = &opts.dump_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let source = flipbook::source::open(&opts.path)
        .with_context(|| format!("opening {}", opts.path.display()))?;
    let pool = Arc::new(HeapPool::new());
    let worker = Arc::new(DecodeWorker::spawn("flipbook-decode")?);
    let player = PlaybackController::new(source, pool.clone(), worker, &config)?;

    let finished = Arc::new(AtomicBool::new(false));
    let finished_flag = finished.clone();
    player.set_finished_listener(move || finished_flag.store(true, Ordering::SeqCst))?;

    // Wake the render loop as soon as a decoded frame is armed.
    let (wake_tx, wake_rx) = crossbeam_channel::bounded::<u64>(4);
    player.set_invalidate_listener(move |deadline| {
        let _ = wake_tx.try_send(deadline);
    })?;

    let seq = player.sequence();
    log::info!(
        "Playing {} ({} frames, {:?})",
        opts.path.display(),
        seq.frame_count,
        config.loop_policy
    );

    let epoch = Instant::now();
    let mut deadline: Option<u64> = None;
    let mut shown = 0u64;

    if let Some(dir) = &opts.dump_dir {
        player.with_visible_frame(|f| save_frame(dir, shown, f, seq.width, seq.height))??;
    }
    player.start()?;

    while !finished.load(Ordering::SeqCst) && epoch.elapsed().as_secs_f64() < opts.max_secs {
        let now_ms = epoch.elapsed().as_millis() as u64;
        if player.on_render_pass(now_ms)? {
            shown += 1;
            log::info!("t={now_ms}ms frame {}", player.current_frame());
            if let Some(dir) = &opts.dump_dir {
                player.with_visible_frame(|f| save_frame(dir, shown, f, seq.width, seq.height))??;
            }
            deadline = None;
        }
        if !player.is_running() {
            break;
        }

        let wait = match deadline {
            Some(d) => Duration::from_millis(d.saturating_sub(now_ms)).min(IDLE_POLL),
            None => IDLE_POLL,
        };
        if let Ok(d) = wake_rx.recv_timeout(wait) {
            deadline = Some(d);
        }
    }

    player.destroy()?;
    log::info!(
        "Showed {shown} frames, {} loop(s); pool: {} acquired, {} released",
        player.loop_count(),
        pool.acquired(),
        pool.released()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Options> {
        parse_args(args.iter().map(|a| (*a).to_string()))
    }

    #[test]
    fn parses_policy_and_flags() {
        let opts = parse(&["anim.gif", "--loops", "3", "--save-config", "--seconds", "2.5"]).unwrap();
        assert_eq!(opts.path, PathBuf::from("anim.gif"));
        assert_eq!(opts.loop_policy, Some(LoopPolicy::Finite(3)));
        assert!(opts.save_config);
        assert_eq!(opts.max_secs, 2.5);
        assert!(opts.dump_dir.is_none());
    }

    #[test]
    fn config_is_not_saved_by_default() {
        let opts = parse(&["--once", "anim.webp"]).unwrap();
        assert_eq!(opts.loop_policy, Some(LoopPolicy::Once));
        assert!(!opts.save_config);
    }

    #[test]
    fn rejects_missing_path_and_unknown_options() {
        assert!(parse(&["--once"]).is_err());
        assert!(parse(&["anim.gif", "--bogus"]).is_err());
        assert!(parse(&["anim.gif", "--loops"]).is_err());
    }
}
