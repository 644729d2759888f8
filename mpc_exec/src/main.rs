//! # MPC Executable
//!
//! Runs a scenario end to end: loads the controller parameters and the scenario, builds the
//! reference trajectory, then runs the receding horizon controller until the reference is
//! exhausted, archiving every tick into the session.
//!
//! Usage: `mpc_exec <scenario.toml> [sim_time_s]`

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::env;

use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use log::{debug, info, warn};
use serde::Serialize;

use mpc_lib::{
    config::Config,
    rh_ctrl::{self, InputData, RhCtrl, SimRecord},
    scene::{DirectPlanner, Scenario, Scene},
    solver,
    traj::ReferenceTrajectory,
};
use util::{
    archive::Archiver,
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One row of the tick archive.
#[derive(Serialize)]
struct TickRecord {
    step: usize,
    time_s: f64,
    x_m: f64,
    y_m: f64,
    heading_rad: f64,
    lin_vel_ms: f64,
    ang_vel_rads: f64,
    cost: f64,
    solve_time_ms: f64,
    num_truncated_vertices: usize,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("mpc_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("MPC Executable\n");
    info!("Running on: {}", host::get_host_info());
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let config: Config = util::params::load("mpc.toml").wrap_err("Could not load MPC params")?;
    config.validate().wrap_err("Invalid MPC params")?;

    let args: Vec<String> = env::args().collect();
    debug!("CLI arguments: {:?}", args);

    let scenario_path = match args.get(1) {
        Some(p) => p,
        None => return Err(eyre!("Expected path to a scenario file as the first argument")),
    };

    let sim_time_s: Option<f64> = match args.get(2) {
        Some(t) => Some(
            t.parse()
                .wrap_err_with(|| format!("Invalid simulation time \"{}\"", t))?,
        ),
        None => None,
    };

    info!("Loading scenario from \"{}\"", scenario_path);
    let scenario: Scenario =
        util::params::load_path(scenario_path).wrap_err("Could not load the scenario")?;

    // ---- SCENE AND REFERENCE ----

    let scene = Scene::from_scenario(&scenario).wrap_err("Invalid scenario geometry")?;
    let path = scene
        .path(&DirectPlanner {
            point_sep_m: config.path_sep_m,
        })
        .wrap_err("Could not find a path through the scene")?;

    let reference = ReferenceTrajectory::from_path(&path, Some(config.path_sep_m))
        .wrap_err("Could not build the reference trajectory")?;
    info!(
        "Reference trajectory has {} states over {:.1} s",
        reference.len(),
        reference.len() as f64 * config.dt_s
    );

    let steps = match sim_time_s {
        Some(t) => rh_ctrl::num_steps_for_duration(t, config.dt_s),
        None => rh_ctrl::default_num_steps(&reference),
    };

    session.save("scene.json", scene.clone());
    session.save("reference.json", reference.clone());

    // ---- MODULE INIT ----

    let solver = solver::from_config(&config).wrap_err("Failed to initialise the solver")?;
    info!("Solver initialised");

    let initial_state = reference.first();
    let dt_s = config.dt_s;
    let mut rh_ctrl = RhCtrl::new(config, reference, initial_state, solver)
        .wrap_err("Failed to initialise RhCtrl")?;
    info!("RhCtrl init complete");

    let mut arch = Archiver::from_path(&session, "rh_ctrl.csv")
        .wrap_err("Failed to create the RhCtrl archive")?;

    let input = InputData {
        static_vertices: scene.obstacle_vertices(),
        dynamic_obstacles: scene.dynamic_obstacles.clone(),
    };

    // ---- MAIN LOOP ----

    info!("Begining main loop of {} steps\n", steps);

    let mut record = SimRecord::new(initial_state);
    let mut arch_error = None;

    let run_result = rh_ctrl.run_with(&input, steps, &mut record, |output, report| {
        let tick = TickRecord {
            step: output.step,
            time_s: output.step as f64 * dt_s,
            x_m: output.state[0],
            y_m: output.state[1],
            heading_rad: output.state[2],
            lin_vel_ms: output.cmd[0],
            ang_vel_rads: output.cmd[1],
            cost: report.cost,
            solve_time_ms: report.solve_time_ms,
            num_truncated_vertices: report.num_truncated_vertices,
        };

        if let Err(e) = arch.serialise(tick) {
            warn!("Failed to archive step {}: {}", output.step, e);
            arch_error.get_or_insert(e);
        }
    });

    // ---- SHUTDOWN ----

    let final_state = *rh_ctrl.state();
    info!(
        "Final state ({:.3}, {:.3}, {:.3}), {:.3} m from the goal",
        final_state[0],
        final_state[1],
        final_state[2],
        (final_state.xy() - scene.goal).norm()
    );

    // Release the solver before the session closes
    drop(rh_ctrl);

    // Keep whatever was run, even if the loop failed
    session.save("sim_record.json", record);

    session.exit();

    run_result.wrap_err("Error processing receding horizon control")?;

    match arch_error {
        Some(e) => Err(e).wrap_err("Failed to archive the run"),
        None => Ok(()),
    }
}
