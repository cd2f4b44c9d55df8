//! End-to-end runs of the standardization pipeline on synthetic ERA-Interim files.
use std::path::{Path, PathBuf};

use approx::assert_relative_eq;
use chrono::NaiveDate;
use cmorize_rs::{
    cmor_table::VariableTable,
    config::{BuiltinDataset, DatasetConfig},
    dispatch::{run_batch, DispatchError, TaskResult},
    nc_utils::get_string_attr,
    resolver::resolve_file_groups,
    test_utils::{transition_value, write_raw_file, write_transition_file, RawFileSpec},
    transform::{cmorize_group, TransformContext},
};
use netcdf::Extents;

fn run(in_dir: &Path, out_dir: &Path, names: &[&str]) -> error_stack::Result<Vec<TaskResult>, DispatchError> {
    let mut config = DatasetConfig::load(None).unwrap();
    config.attributes.resolve_comment_year(2024);
    let table = VariableTable::builtin().unwrap();
    let variables: Vec<_> = names
        .iter()
        .map(|n| config.variable(n).unwrap().clone())
        .collect();
    let ctx = TransformContext {
        attributes: &config.attributes,
        table: &table,
        out_dir,
    };
    run_batch(
        &variables,
        |spec| resolve_file_groups(in_dir, spec),
        |spec, group| cmorize_group(spec, group, &ctx),
        2,
    )
}

fn output_names(results: &[TaskResult]) -> Vec<String> {
    let mut names: Vec<String> = results
        .iter()
        .map(|r| {
            let path: &PathBuf = r.outcome.as_ref().unwrap();
            path.file_name().unwrap().to_string_lossy().to_string()
        })
        .collect();
    names.sort();
    names
}

#[test]
fn test_monthly_files_one_output_each() {
    let in_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    for year in [2000, 2001] {
        let spec = RawFileSpec::new("t2m", "K")
            .with_packing(0.01, 270.0)
            .with_base(270.0)
            .monthly(year, 12);
        write_raw_file(&in_dir.path().join(format!("ERA-Interim_t2m_monthly_{year}.nc")), &spec).unwrap();
    }

    let results = run(in_dir.path(), out_dir.path(), &["tas"]).unwrap();
    assert_eq!(
        output_names(&results),
        [
            "OBS6_ERA-Interim_reanaly_1_Amon_tas_200001-200012.nc",
            "OBS6_ERA-Interim_reanaly_1_Amon_tas_200101-200112.nc",
        ]
    );

    let ds = netcdf::open(out_dir.path().join("OBS6_ERA-Interim_reanaly_1_Amon_tas_200001-200012.nc")).unwrap();
    let title = ds.attribute("title").unwrap().value().unwrap();
    assert!(matches!(title, netcdf::AttributeValue::Str(s) if s.starts_with("ERA-Interim")));
    let time = ds.variable("time").unwrap();
    assert_eq!(get_string_attr(&time, "units").as_deref(), Some("days since 1850-1-1 00:00:00.0"));
    assert!(ds.variable("time_bnds").is_some());
    let tas = ds.variable("tas").unwrap();
    let values: Vec<f32> = tas.get_values(Extents::All).unwrap();
    // the first raw value (northernmost latitude) is missing and ends up at the last latitude index
    assert_relative_eq!(values[2 * 4], 1e20);
    assert!(values[0] > 270.0 && values[0] < 300.0);
}

#[test]
fn test_summed_variable_skips_incomplete_years() {
    let in_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    for raw in ["ssr", "str", "slhf", "sshf"] {
        let spec = RawFileSpec::new(raw, "J m**-2").with_base(86400.0).monthly(2000, 12);
        write_raw_file(&in_dir.path().join(format!("ERA-Interim_{raw}_monthly_2000.nc")), &spec).unwrap();
    }
    let spec = RawFileSpec::new("ssr", "J m**-2").monthly(2001, 12);
    write_raw_file(&in_dir.path().join("ERA-Interim_ssr_monthly_2001.nc"), &spec).unwrap();

    let results = run(in_dir.path(), out_dir.path(), &["hfds"]).unwrap();
    assert_eq!(output_names(&results), ["OBS6_ERA-Interim_reanaly_1_Omon_hfds_200001-200012.nc"]);

    let ds = netcdf::open(results[0].outcome.as_ref().unwrap()).unwrap();
    let hfds = ds.variable("hfds").unwrap();
    assert_eq!(get_string_attr(&hfds, "positive").as_deref(), Some("down"));
    assert_eq!(get_string_attr(&hfds, "units").as_deref(), Some("W m-2"));
    // four fields of roughly 86400 J m-2 per day sum to roughly 4 W m-2
    let values: Vec<f32> = hfds.get_values(Extents::All).unwrap();
    assert!(values[1] > 3.9 && values[1] < 4.1, "unexpected hfds value {}", values[1]);
}

#[test]
fn test_daily_precipitation() {
    let in_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let start = NaiveDate::from_ymd_opt(2000, 1, 1)
        .unwrap()
        .and_hms_opt(6, 0, 0)
        .unwrap();
    // stamps 06, 12, 18, 00 on two consecutive days
    let spec = RawFileSpec::new("tp", "m").with_times(start, 6.0, 8);
    write_raw_file(&in_dir.path().join("ERA-Interim_tp_daily_2000.nc"), &spec).unwrap();

    let results = run(in_dir.path(), out_dir.path(), &["pr_day"]).unwrap();
    assert_eq!(output_names(&results), ["OBS6_ERA-Interim_reanaly_1_day_pr_200001-200001.nc"]);

    let ds = netcdf::open(results[0].outcome.as_ref().unwrap()).unwrap();
    let time: Vec<f64> = ds.variable("time").unwrap().get_values(Extents::All).unwrap();
    assert_eq!(time, vec![54786.5, 54787.5]);

    // output latitude is increasing, so raw latitude index 0 (10N) is output index 2
    let pr = ds.variable("pr").unwrap();
    let values: Vec<f32> = pr.get_values(Extents::All).unwrap();
    let (nlat, nlon) = (3, 4);
    let day0_north_lon1 = values[2 * nlon + 1];
    let raw_sum: f64 = (0..4).map(|t| 1.0 + t as f64 + 0.001).sum();
    assert_relative_eq!(day0_north_lon1 as f64, raw_sum * 1000.0 / 86400.0, max_relative = 1e-5);
    let day1_north_lon1 = values[nlat * nlon + 2 * nlon + 1];
    let raw_sum: f64 = (4..8).map(|t| 1.0 + t as f64 + 0.001).sum();
    assert_relative_eq!(day1_north_lon1 as f64, raw_sum * 1000.0 / 86400.0, max_relative = 1e-5);
}

#[test]
fn test_failure_stops_later_variables() {
    let in_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    // the psl file holds the wrong variable, so loading "msl" fails
    let spec = RawFileSpec::new("t2m", "K").monthly(2000, 12);
    write_raw_file(&in_dir.path().join("ERA-Interim_msl_monthly_2000.nc"), &spec).unwrap();
    write_raw_file(&in_dir.path().join("ERA-Interim_t2m_monthly_2000.nc"), &spec).unwrap();

    let err = run(in_dir.path(), out_dir.path(), &["psl", "tas"]).unwrap_err();
    assert!(matches!(err.current_context(), DispatchError::Task { variable, .. } if variable == "psl"));
    assert_eq!(std::fs::read_dir(out_dir.path()).unwrap().count(), 0);
}

#[test]
fn test_no_input_files_is_not_an_error() {
    let in_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let results = run(in_dir.path(), out_dir.path(), &["tas", "hfds", "orog"]).unwrap();
    assert!(results.is_empty());
}

#[test]
fn test_vegetation_transition_climatology() {
    let in_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    write_transition_file(&in_dir.path().join("albedo_IGBPgen.nc")).unwrap();

    let mut config = DatasetConfig::builtin(BuiltinDataset::Duveiller2018).unwrap();
    config.attributes.resolve_comment_year(2024);
    let table = VariableTable::for_project(&config.attributes.project_id, None).unwrap();
    let ctx = TransformContext {
        attributes: &config.attributes,
        table: &table,
        out_dir: out_dir.path(),
    };
    let results = run_batch(
        &config.variables,
        |spec| resolve_file_groups(in_dir.path(), spec),
        |spec, group| cmorize_group(spec, group, &ctx),
        1,
    )
    .unwrap();
    assert_eq!(
        output_names(&results),
        ["OBS_Duveiller2018_clim_v2018_Amon_albDiffiTr13_201001-201012.nc"]
    );

    let ds = netcdf::open(results[0].outcome.as_ref().unwrap()).unwrap();
    let code = ds.attribute("Vegetation transition code").unwrap().value().unwrap();
    assert!(matches!(code, netcdf::AttributeValue::Int(2)), "unexpected code {code:?}");
    assert!(ds.variable("iTr").is_none());

    // mid-January 2010 is 21930.5 days after 1950-01-01, and 1950 starts 36524 days after 1850
    let time: Vec<f64> = ds.variable("time").unwrap().get_values(Extents::All).unwrap();
    assert_eq!(time.len(), 12);
    assert_relative_eq!(time[0], 36524.0 + 21930.5);
    let bnds: Vec<f64> = ds.variable("time_bnds").unwrap().get_values(Extents::All).unwrap();
    assert_relative_eq!(bnds[0], 36524.0 + 21915.0);
    assert_relative_eq!(bnds[23], 36524.0 + 22280.0);

    let lat: Vec<f64> = ds.variable("lat").unwrap().get_values(Extents::All).unwrap();
    assert_eq!(lat, vec![-10.0, 0.0, 10.0]);

    // shape (time, lat, lon); output latitude 0 is raw latitude index 2
    let alb = ds.variable("albDiffiTr13").unwrap();
    let values: Vec<f32> = alb.get_values(Extents::All).unwrap();
    let (nlat, nlon) = (3, 4);
    let march_south_lon1 = values[2 * nlat * nlon + 1];
    assert_relative_eq!(march_south_lon1 as f64, transition_value(1, 2, 2, 1), max_relative = 1e-6);
}
