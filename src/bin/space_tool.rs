use anyhow::{anyhow, bail, Context, Result};
use glam::Vec3;
use std::cell::RefCell;
use std::collections::HashSet;
use std::env;
use std::io::Cursor;
use std::path::Path;
use std::process;
use std::rc::Rc;

use vantage_engine::config::ViewerConfig;
use vantage_engine::navigation::NavigationOptions;
use vantage_engine::space::SpaceData;
use vantage_engine::texture_cache::{BlockingTextureLoader, TextureFetcher};
use vantage_engine::{NoopHooks, Viewer, ViewerParams};

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:?}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };
    match command.as_str() {
        "validate" => {
            let space_path = args
                .next()
                .ok_or_else(|| anyhow!("validate requires a path: space_tool validate <space>"))?;
            cmd_validate(&space_path)
        }
        "info" => {
            let space_path =
                args.next().ok_or_else(|| anyhow!("info requires a path: space_tool info <space>"))?;
            cmd_info(&space_path)
        }
        "walk" => {
            let space_path = args.next().ok_or_else(|| {
                anyhow!("walk requires arguments: space_tool walk <space> <from> <to>")
            })?;
            let from = args.next().ok_or_else(|| anyhow!("walk missing <from> node uuid"))?;
            let to = args.next().ok_or_else(|| anyhow!("walk missing <to> node uuid"))?;
            cmd_walk(&space_path, &from, &to)
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => Err(anyhow!("unknown command '{other}'")),
    }
}

fn print_usage() {
    eprintln!(
        "Space Tool

Usage:
  space_tool validate <space_path>     Check node uuids, the initial node, and waypoint usage
  space_tool info <space_path>         Print counts, world bounds, and nearest-neighbor preview
  space_tool walk <space> <from> <to>  Simulate a navigation headlessly and print the transitions
  space_tool help                      Show this message
"
    );
}

fn cmd_validate(space_path: &str) -> Result<()> {
    let space = load_space(space_path)?;
    let mut ids = HashSet::with_capacity(space.nodes.len());
    let mut issues = Vec::new();

    for node in &space.nodes {
        if !ids.insert(node.uuid.clone()) {
            issues.push(format!("duplicate node uuid '{}'", node.uuid));
        }
        if !node.is_waypoint() && node.image.is_empty() {
            issues.push(format!("node '{}' has no image base path", node.uuid));
        }
    }

    if let Some(initial) = space.initial_node.as_deref() {
        if !ids.contains(initial) {
            issues.push(format!("initial node '{initial}' is not in the node list"));
        }
    }

    let waypoints = space.nodes.iter().filter(|node| node.is_waypoint()).count();
    if space.nodes.len() == waypoints {
        issues.push("every node is a waypoint; nothing is standable".to_string());
    }

    if issues.is_empty() {
        println!(
            "Space '{}' is valid. Nodes: {} ({} waypoints). Version: {}",
            space_path,
            space.nodes.len(),
            waypoints,
            space.version.as_deref().unwrap_or("-"),
        );
        Ok(())
    } else {
        Err(anyhow!(format!("space '{}' has issues:\n  - {}", space_path, issues.join("\n  - "))))
    }
}

fn cmd_info(space_path: &str) -> Result<()> {
    let space = load_space(space_path)?;
    let waypoints = space.nodes.iter().filter(|node| node.is_waypoint()).count();

    println!("Space file:   {space_path}");
    println!("Version:      {}", space.version.as_deref().unwrap_or("-"));
    println!("Mesh:         {}", space.mesh.as_deref().unwrap_or("-"));
    println!(
        "Initial node: {}",
        space.initial_node().map(|node| node.uuid.as_str()).unwrap_or("-")
    );
    println!("Nodes:        {} ({} waypoints)", space.nodes.len(), waypoints);

    let world_positions: Vec<Vec3> =
        space.nodes.iter().map(|node| space.node_world_position(node)).collect();
    if let (Some(min), Some(max)) = (
        world_positions.iter().copied().reduce(Vec3::min),
        world_positions.iter().copied().reduce(Vec3::max),
    ) {
        println!("Bounds min:   ({:.2}, {:.2}, {:.2})", min.x, min.y, min.z);
        println!("Bounds max:   ({:.2}, {:.2}, {:.2})", max.x, max.y, max.z);
    }

    println!();
    println!("{:<28} {:<28} {}", "Node", "Nearest", "Distance");
    println!("{}", "-".repeat(68));
    for node in space.nodes.iter().filter(|node| !node.is_waypoint()).take(10) {
        let position = Vec3::from(node.position);
        let nearest = space
            .nodes
            .iter()
            .filter(|other| other.uuid != node.uuid && !other.is_waypoint())
            .map(|other| (other.uuid.as_str(), position.distance(Vec3::from(other.position))))
            .min_by(|a, b| a.1.total_cmp(&b.1));
        match nearest {
            Some((uuid, distance)) => {
                println!("{:<28} {:<28} {:.2}", node.uuid, uuid, distance);
            }
            None => println!("{:<28} {:<28} -", node.uuid, "-"),
        }
    }
    Ok(())
}

/// Fetcher for headless runs: every face resolves to the same tiny image.
struct StubFetcher;

impl TextureFetcher for StubFetcher {
    fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([128, 128, 128, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .context("encode stub texture")?;
        Ok(bytes)
    }
}

fn cmd_walk(space_path: &str, from: &str, to: &str) -> Result<()> {
    let space = load_space(space_path)?;
    for uuid in [from, to] {
        if space.find_node(uuid).is_none() {
            bail!("node '{uuid}' not found in space '{space_path}'");
        }
    }

    let mut viewer = Viewer::new(ViewerParams {
        config: ViewerConfig::default(),
        space,
        loader: Box::new(BlockingTextureLoader::new(Box::new(StubFetcher))),
        exterior: None,
        hooks: Box::new(NoopHooks),
    })?;

    let last: Rc<RefCell<(Option<String>, bool)>> = Rc::new(RefCell::new((None, false)));
    let watch = last.clone();
    viewer.state().subscribe(move |snapshot| {
        let mut last = watch.borrow_mut();
        if last.0 != snapshot.current_node {
            println!("  node -> {}", snapshot.current_node.as_deref().unwrap_or("-"));
            last.0 = snapshot.current_node.clone();
        }
        if last.1 != snapshot.is_navigating {
            println!(
                "  {}",
                if snapshot.is_navigating { "crossfade started" } else { "crossfade finished" }
            );
            last.1 = snapshot.is_navigating;
        }
    });

    println!("settling on '{from}'");
    viewer.navigate_to(from, NavigationOptions::default());
    let ticks = run_until_idle(&mut viewer)?;
    println!("standing at '{from}' after {ticks} ticks");

    println!("walking to '{to}'");
    viewer.navigate_when_ready(to);
    let ticks = run_until_idle(&mut viewer)?;
    println!("arrived at '{to}' after {ticks} ticks");
    Ok(())
}

/// Steps 20ms frames until every glide and crossfade has finished.
fn run_until_idle(viewer: &mut Viewer) -> Result<u32> {
    const MAX_TICKS: u32 = 1_000;
    for tick in 1..=MAX_TICKS {
        viewer.update(0.02);
        if !viewer.is_transitioning() {
            return Ok(tick);
        }
    }
    bail!("still in transition after {MAX_TICKS} ticks")
}

fn load_space(path: &str) -> Result<SpaceData> {
    let normalized = Path::new(path).canonicalize().unwrap_or_else(|_| Path::new(path).to_path_buf());
    SpaceData::load_from_path(&normalized)
        .with_context(|| format!("loading space '{}'", normalized.display()))
}
