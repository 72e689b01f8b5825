use clap::{value_parser, Arg, ArgAction, Command};
use gyrocal::{
  do_gyro_calibration,
  notify::{LogNotifier, Notifier, UdpNotifier},
  params::JsonParamStore,
  sim::{SimConfig, SimRig},
  CalibrationConfig,
};
use jeflog::{fail, pass, task};
use std::{process::ExitCode, time::Duration};

fn main() -> ExitCode {
  let matches = Command::new("gyrocal")
    .about("Calibrates gyroscope biases on the simulated bench rig")
    .arg(
      Arg::new("params")
        .long("params")
        .help("JSON file the calibration parameters are saved to")
        .default_value("gyro_params.json"),
    )
    .arg(
      Arg::new("ground")
        .long("ground")
        .help("address to send calibration notices to, such as servo:5026")
        .required(false),
    )
    .arg(
      Arg::new("samples")
        .long("samples")
        .help("samples to collect from the reference gyro")
        .value_parser(value_parser!(u32)),
    )
    .arg(
      Arg::new("settle")
        .long("settle")
        .help("seconds to wait before sampling")
        .value_parser(value_parser!(u64)),
    )
    .arg(
      Arg::new("absent")
        .long("absent")
        .help("leave a gyro slot empty (repeatable)")
        .value_parser(value_parser!(usize))
        .action(ArgAction::Append),
    )
    .get_matches();

  let mut config = CalibrationConfig::default();

  if let Some(samples) = matches.get_one::<u32>("samples") {
    config.target_samples = *samples;
  }

  if let Some(settle) = matches.get_one::<u64>("settle") {
    config.settle_time = Duration::from_secs(*settle);
  }

  let mut sim = SimConfig::default();
  if let Some(slots) = matches.get_many::<usize>("absent") {
    for slot in slots {
      sim = sim.without(*slot);
    }
  }

  let params_path = matches
    .get_one::<String>("params")
    .cloned()
    .unwrap_or_else(|| "gyro_params.json".to_owned());

  let mut params = match JsonParamStore::open(&params_path) {
    Ok(params) => params,
    Err(error) => {
      fail!("Failed to open parameter file {params_path}: {error}");
      return ExitCode::FAILURE;
    }
  };

  task!("Starting simulated rig.");
  let mut rig = SimRig::start(sim);

  let calibrated = match matches.get_one::<String>("ground") {
    Some(ground) => match UdpNotifier::new(ground.as_str()) {
      Ok(mut notifier) => calibrate(&mut rig, &mut params, &mut notifier, &config),
      Err(error) => {
        fail!("Failed to reach ground at {ground}: {error}");
        return ExitCode::FAILURE;
      }
    },
    None => calibrate(&mut rig, &mut params, &mut LogNotifier, &config),
  };

  if calibrated {
    pass!("Saved calibration to {}.", params.path().display());
    ExitCode::SUCCESS
  } else {
    ExitCode::FAILURE
  }
}

fn calibrate(
  rig: &mut SimRig,
  params: &mut JsonParamStore,
  notifier: &mut impl Notifier,
  config: &CalibrationConfig,
) -> bool {
  do_gyro_calibration(&mut rig.bus, &mut rig.hub, params, notifier, config)
    .is_ok()
}
