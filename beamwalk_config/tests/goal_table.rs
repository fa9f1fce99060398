use std::io::Write;

use beamwalk_config::{Config, load_goal_table};

fn write_csv(content: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(content.as_bytes()).unwrap();
    f.flush().unwrap();
    f
}

#[test]
fn loads_well_formed_table() {
    let f = write_csv("imager,goal,tolerance\nimg1,240.0,5.0\nimg2,250.0,4.0\n");
    let rows = load_goal_table(f.path()).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].imager, "img1");
    assert_eq!(rows[1].goal, 250.0);
}

#[test]
fn rejects_wrong_headers() {
    let f = write_csv("camera,pixel,tol\nimg1,240.0,5.0\n");
    let err = load_goal_table(f.path()).unwrap_err();
    assert!(err.to_string().contains("imager,goal,tolerance"));
}

#[test]
fn rejects_out_of_range_rows() {
    let f = write_csv("imager,goal,tolerance\nimg1,240.0,0.0\n");
    assert!(load_goal_table(f.path()).is_err());

    let f = write_csv("imager,goal,tolerance\nimg1,nan,5.0\n");
    assert!(load_goal_table(f.path()).is_err());
}

#[test]
fn table_overrides_matching_pairs() {
    let mut cfg = Config::from_toml(
        r#"
        [[pairs]]
        name = "img1"
        goal = 100.0
        tolerance = 20.0
        [[pairs]]
        name = "img2"
        goal = 100.0
        tolerance = 20.0
        "#,
    )
    .unwrap();
    let f = write_csv("imager,goal,tolerance\nimg2,333.0,7.0\n");
    let rows = load_goal_table(f.path()).unwrap();
    cfg.apply_goal_table(&rows).unwrap();
    assert_eq!(cfg.pairs[0].goal, 100.0);
    assert_eq!(cfg.pairs[1].goal, 333.0);
    assert_eq!(cfg.pairs[1].tolerance, 7.0);
}

#[test]
fn unknown_imager_in_table_errors() {
    let mut cfg = Config::from_toml("[[pairs]]\nname = \"img1\"\ngoal = 1.0\n").unwrap();
    let f = write_csv("imager,goal,tolerance\nghost,1.0,1.0\n");
    let rows = load_goal_table(f.path()).unwrap();
    assert!(cfg.apply_goal_table(&rows).is_err());
}
