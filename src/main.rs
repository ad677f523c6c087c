use strata::affect::Affect;
use strata::brain::Brain;
use strata::checkpoint::CheckpointManager;
use strata::config::BrainConfig;
use strata::experiments::env_grid::{run_grid_demo, Grid1D, GridConfig};
use strata::level::{Level, LevelEngine};
use strata::observer::BrainAdapter;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() >= 2 && (args[1] == "--help" || args[1] == "-h" || args[1] == "help") {
        print_help();
        return;
    }
    if args.len() >= 2 && args[1] == "baseline" {
        run_baseline();
        return;
    }
    if args.len() >= 2 && args[1] == "inspect" {
        let Some(path) = args.get(2) else {
            eprintln!("inspect needs a checkpoint path");
            print_help();
            std::process::exit(2);
        };
        std::process::exit(inspect(path));
    }

    if args.len() >= 2 {
        eprintln!("Unknown command: {}", args[1]);
        print_help();
        std::process::exit(2);
    }

    // Minimal demo:
    // - a ring of nine cells, one of which pays reward
    // - the brain sees only its own position and can step left or right
    // - sequences that lead onto the rewarded cell gain value and become goals
    let mut world = Grid1D::new(GridConfig::default());
    let mut brain = Brain::new(
        BrainConfig::new(world.num_sensors(), world.num_actions())
            .with_name("grid_demo")
            .with_log_dir(std::env::temp_dir().join("strata"))
            .with_levels(2)
            .with_seed(7),
    );

    let avg = run_grid_demo(&mut brain, &mut world, 5_000, 500);
    println!();
    println!("{}", BrainAdapter::new(&brain).status_line());
    println!("average reward: {avg:.3}");
}

fn print_help() {
    println!("strata (hierarchical reinforcement-learning agent)");
    println!("usage:");
    println!("  cargo run");
    println!("  cargo run -- baseline");
    println!("  cargo run -- inspect <checkpoint>");
    println!("  cargo run -- --help");
}

/// Learning brain against a random-action brain on the same world.
fn run_baseline() {
    let steps = 5_000;
    let mut results = Vec::new();
    for random in [false, true] {
        let mut world = Grid1D::new(GridConfig::default());
        let mut brain = Brain::new(
            BrainConfig::new(world.num_sensors(), world.num_actions())
                .with_name(if random { "grid_random" } else { "grid_learning" })
                .with_log_dir(std::env::temp_dir().join("strata"))
                .with_seed(7)
                .with_random_actions(random),
        );
        let avg = run_grid_demo(&mut brain, &mut world, steps, 0);
        results.push((brain.name().to_string(), avg));
    }
    for (name, avg) in results {
        println!("{name:>14}: average reward {avg:+.3} over {steps} steps");
    }
}

fn inspect(path: &str) -> i32 {
    match CheckpointManager::load_from::<Level, Affect>(std::path::Path::new(path)) {
        Ok(state) => {
            println!(
                "{}: timestep {}, {} sensors, {} actions (reserved included), satisfaction {:+.3}",
                state.name,
                state.timestep,
                state.num_sensors,
                state.num_actions,
                state.satisfaction
            );
            println!("average reward {:+.3}", state.affect.average_reward());
            for level in &state.levels {
                let s = level.summary();
                println!(
                    "  level {}: {} elements, {}/{} sequences allocated, mean reward {:+.3}",
                    s.index,
                    s.num_elements,
                    s.allocated_sequences,
                    s.num_sequences,
                    s.mean_reward_estimate
                );
            }
            0
        }
        Err(e) => {
            eprintln!("could not read {path}: {e}");
            1
        }
    }
}
