//! Align the simulated two-mirror line and print where the beam landed.
//!
//! Run with: cargo run -p beamwalk_core --example quick_start

use beamwalk_core::{Beamline, IterWalk};
use beamwalk_sim::SimBeamline;

fn main() -> beamwalk_core::Result<()> {
    let line = SimBeamline::classic_two_mirror();
    let mut builder = Beamline::builder();
    for (imager, mirror) in line.imagers.into_iter().zip(line.mirrors) {
        builder = builder.add_pair(imager, mirror);
    }
    let mut beamline = builder.build()?;

    let cfg = IterWalk::builder()
        .goals(vec![240.0, 240.0])
        .tolerances(5.0)
        .first_steps(1e-4)
        .max_walks(10)
        .build(2)?;
    let mut walker = IterWalk::new(cfg);
    walker.run(&mut beamline)?;

    for (i, pair) in walker.pairs().iter().enumerate() {
        println!(
            "pair {i}: centroid {:.2} (goal {:.1}), mirror at {:.6}, gradient {:?}",
            pair.last_centroid.unwrap_or(f64::NAN),
            pair.goal,
            beamline.motor_position(i),
            pair.gradient,
        );
    }
    let (walks, cycles, recoveries) = walker.counters();
    println!("{walks} walks, {cycles} imager cycles, {recoveries} recoveries");
    Ok(())
}
