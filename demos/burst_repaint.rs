use canvas_repaint::config::RepaintConfig;
use canvas_repaint::render::{Canvas, Rect, RenderContext};
use canvas_repaint::{RenderError, RepaintCoordinator, RepaintError, RepaintEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

/// Fills the requested region of an RGBA buffer, one row at a time, checking
/// for cancellation between rows.
fn render_gradient(ctx: &RenderContext<'_>) -> Result<Vec<u8>, RenderError> {
    let area = ctx.region().unwrap_or(Rect::new(0, 0, WIDTH, HEIGHT));
    let mut pixels = vec![0u8; (WIDTH * HEIGHT * 4) as usize];

    for y in area.y.max(0)..(area.bottom().min(HEIGHT as i64) as i32) {
        ctx.checkpoint()?;

        for x in area.x.max(0)..(area.right().min(WIDTH as i64) as i32) {
            let offset = ((y as u32 * WIDTH + x as u32) * 4) as usize;
            pixels[offset] = (x % 256) as u8;
            pixels[offset + 1] = (y % 256) as u8;
            pixels[offset + 2] = (ctx.seq() % 256) as u8;
            pixels[offset + 3] = 255;
        }

        // Pretend this is expensive
        std::thread::sleep(Duration::from_micros(200));
    }

    Ok(pixels)
}

/// A stand-in for a UI canvas. A real host would schedule a blit on its UI thread.
struct PrintingCanvas;

impl Canvas for PrintingCanvas {
    fn repaint(&self, region: Option<Rect>) {
        match region {
            Some(r) => println!("[canvas] blit {r:?}"),
            None => println!("[canvas] blit whole surface"),
        }
    }

    fn cancel_outstanding(&self) {
        println!("[canvas] releasing listeners of previous job");
    }
}

#[tokio::main]
async fn main() -> Result<(), RepaintError> {
    env_logger::init();

    // Configure the coordinator. The debounce window decides how long a burst of
    // requests may keep arriving before they are merged into a single repaint.
    let config = RepaintConfig::builder()
        .name("demo-canvas")
        .debounce(Duration::from_millis(15))
        .build()?;

    let coordinator = RepaintCoordinator::new(config, Arc::new(PrintingCanvas), render_gradient)?;

    // Only events sent from this point on are received.
    let mut event_rx = coordinator.subscribe_events();

    // Simulate a mouse drag: every move damages a small rectangle around the
    // pointer. The coordinator merges them into far fewer renders.
    for step in 0..60 {
        coordinator.paint(Rect::new(step * 8, step * 6, 32, 32))?;
        sleep(Duration::from_millis(2)).await;
    }

    // A cursor blink only needs the existing offscreen image to be drawn again.
    coordinator.repaint(Some(Rect::new(10, 10, 2, 16)))?;

    // And a full regeneration, immediately superseded by another one.
    coordinator.paint_all()?;
    sleep(Duration::from_millis(30)).await;
    coordinator.paint_all()?;

    coordinator.wait_for_repaint().await;

    while let Ok(ev) = event_rx.try_recv() {
        match ev {
            RepaintEvent::JobCommitted { seq, region, .. } => {
                println!("[event] job {seq} committed for {region:?}")
            }
            RepaintEvent::JobDiscarded { seq, reason, .. } => {
                println!("[event] job {seq} discarded: {reason:?}")
            }
            RepaintEvent::JobFailed { seq, error, .. } => println!("[event] job {seq} failed: {error}"),
            _ => {}
        }
    }

    let stats = coordinator.stats();
    println!(
        "{} requests, {} merged batches, {} jobs started, {} committed, {} discarded, {} draws",
        stats.requests,
        stats.merges,
        stats.jobs_started,
        stats.jobs_committed,
        stats.jobs_discarded,
        stats.draws
    );

    if let Some(seq) = coordinator.slot().with_contents(|c| c.generated_by) {
        println!("Offscreen image generated by job {seq}");
    }

    println!("Shutting down...");
    coordinator.quit();
    coordinator.wait_for_offs().await;
    coordinator.join().await?;

    println!("Done. Exiting.");
    Ok(())
}
