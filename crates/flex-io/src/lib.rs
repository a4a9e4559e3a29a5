//! # flex-io: Feeder models and result files
//!
//! - [`cigre`] builds the CIGRE medium-voltage benchmark feeder with PV and
//!   wind DER, the reference network of the flexibility studies.
//! - [`persistence`] writes and reads labeled point sets
//!   (`Flexibility_area_<name>.csv`), and exports hull vertices and
//!   multiplicity grids for plotting.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flex_io::{cigre, persistence};
//!
//! fn main() -> anyhow::Result<()> {
//!     let network = cigre::cigre_mv_pv_wind()?;
//!     println!("{}", network.stats());
//!
//!     let set = persistence::read_point_set(&persistence::result_path("results", "Normal Model"))?;
//!     println!("{} trials", set.results.len());
//!     Ok(())
//! }
//! ```

pub mod cigre;
pub mod persistence;

pub use cigre::{cigre_mv_pv_wind, network_by_name, CIGRE_MV};
pub use persistence::{
    hull_path, multiplicity_path, read_point_set, result_path, write_hull_vertices,
    write_multiplicity, write_point_set, LabeledPointSet,
};
