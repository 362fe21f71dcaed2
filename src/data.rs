pub mod geojson;
pub mod partition;
