use canvas_repaint::config::RepaintConfig;
use canvas_repaint::render::{Canvas, Rect};
use canvas_repaint::worker::StageParams;
use canvas_repaint::{GroupRenderer, GroupingSession, RepaintCoordinator, RepaintError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const TILE: u32 = 64;

/// A visible tile of a large image, scaled for the current magnification.
#[derive(Debug)]
struct Tile {
    column: u32,
    row: u32,
    screen_size: u32,
}

struct TileGrid;

impl GroupRenderer for TileGrid {
    type Descriptor = Tile;

    fn compute(&self, params: StageParams) -> Vec<Tile> {
        let r = params.region;
        let first_col = r.x.max(0) as u32 / TILE;
        let first_row = r.y.max(0) as u32 / TILE;
        let last_col = (r.right().max(0) as u32).div_ceil(TILE);
        let last_row = (r.bottom().max(0) as u32).div_ceil(TILE);
        let screen_size = (TILE as f64 * params.magnification).round() as u32;

        // Pretend layout is expensive
        std::thread::sleep(Duration::from_millis(5));

        (first_row..last_row)
            .flat_map(|row| (first_col..last_col).map(move |column| Tile { column, row, screen_size }))
            .collect()
    }

    fn paint(&self, params: StageParams, tiles: &[Tile]) {
        let covered: u64 = tiles.iter().map(|t| t.screen_size as u64 * t.screen_size as u64).sum();
        println!(
            "[painter] {} tiles at {:.2}x ({} screen pixels), first {:?}",
            tiles.len(),
            params.magnification,
            covered,
            tiles.first()
        );
    }
}

struct PrintingCanvas;

impl Canvas for PrintingCanvas {
    fn repaint(&self, region: Option<Rect>) {
        println!("[canvas] blit {region:?}");
    }
}

#[tokio::main]
async fn main() -> Result<(), RepaintError> {
    env_logger::init();

    // The coordinator owns the on-screen canvas. Its offscreen image here is
    // just the number of the job that produced it.
    let config = RepaintConfig::builder().name("viewer").build()?;
    let coordinator = RepaintCoordinator::new(config, Arc::new(PrintingCanvas), |ctx| Ok(ctx.seq()))?;

    // The grouping session paints tiles and then asks the coordinator for a
    // repaint through its handle.
    let session = GroupingSession::start(
        "tiles",
        Arc::new(TileGrid),
        Arc::new(coordinator.handle()),
        StageParams::new(Rect::new(0, 0, 800, 600), 1.0),
    )?;

    // Zoom in a few steps, faster than the stages can keep up with.
    for step in 1..=8 {
        let magnification = 1.0 + step as f64 * 0.25;
        let width = (800.0 / magnification) as u32;
        let height = (600.0 / magnification) as u32;
        session.set_view(Rect::new(step * 20, step * 15, width, height), magnification)?;
        sleep(Duration::from_millis(2)).await;
    }

    // Setting the same view again is ignored.
    let view = session.view();
    let changed = session.set_view(view.region, view.magnification)?;
    println!("Unchanged view triggered work: {changed}");

    session.wait_idle().await;
    coordinator.wait_for_repaint().await;

    let (updates, paints) = session.passes();
    println!("{updates} updater passes, {paints} painter passes for 9 view changes");
    println!("{} tiles installed", session.descriptors().len());
    println!("{:?}", coordinator.stats());

    session.cancel();
    session.join().await?;
    coordinator.quit();
    coordinator.join().await?;

    println!("Done. Exiting.");
    Ok(())
}
