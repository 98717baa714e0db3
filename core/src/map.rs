//! Known landmark map
//!
//! The map is an ordered, read-only table of landmarks with fixed map-frame coordinates. It is
//! supplied once per session and shared by reference with every weight update. Iteration order is
//! the order the landmarks were supplied in, which is what makes data association tie-breaking
//! deterministic.
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Landmark identifiers as they appear in map files.
pub type LandmarkId = i32;

/// A single map landmark. Also the CSV record layout for map files (`id,x,y`).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub id: LandmarkId,
    pub x: f64,
    pub y: f64,
}

impl Landmark {
    pub fn new(id: LandmarkId, x: f64, y: f64) -> Self {
        Landmark { id, x, y }
    }
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Map {
    landmarks: Vec<Landmark>,
}

impl From<Vec<Landmark>> for Map {
    fn from(landmarks: Vec<Landmark>) -> Self {
        Map { landmarks }
    }
}

impl Map {
    pub fn new(landmarks: Vec<Landmark>) -> Self {
        Map { landmarks }
    }
    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }
    pub fn len(&self) -> usize {
        self.landmarks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }
    /// First landmark carrying `id`, if any.
    pub fn get(&self, id: LandmarkId) -> Option<&Landmark> {
        self.landmarks.iter().find(|landmark| landmark.id == id)
    }
    /// Reads a map from a CSV file with an `id,x,y` header.
    ///
    /// # Arguments
    /// * `path` - Path to the CSV file to read.
    ///
    /// # Returns
    /// * `Ok(Map)` with the landmarks in file order.
    /// * `Err` if the file cannot be read or parsed.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut landmarks = Vec::new();
        for result in rdr.deserialize() {
            let landmark: Landmark = result?;
            landmarks.push(landmark);
        }
        Ok(Map { landmarks })
    }
    /// Writes the map as CSV with an `id,x,y` header.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for landmark in &self.landmarks {
            writer.serialize(landmark)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> Map {
        Map::new(vec![
            Landmark::new(1, 92.064, -34.777),
            Landmark::new(2, 61.109, -47.132),
            Landmark::new(3, 17.42, -4.5993),
        ])
    }

    #[test]
    fn test_lookup_by_id() {
        let map = sample_map();
        assert_eq!(map.len(), 3);
        assert!(!map.is_empty());
        assert_eq!(map.get(2).map(|l| l.x), Some(61.109));
        assert!(map.get(42).is_none());
        assert_eq!(map.landmarks()[0].position(), Point2::new(92.064, -34.777));
    }

    #[test]
    fn test_csv_round_trip() {
        let map = sample_map();
        let temp_file = std::env::temp_dir().join("landmark_pf_map_round_trip.csv");
        map.to_csv(&temp_file).expect("Failed to write map CSV");
        let read_back = Map::from_csv(&temp_file).expect("Failed to read map CSV");
        assert_eq!(read_back, map);
        let _ = std::fs::remove_file(&temp_file);
    }

    #[test]
    fn test_from_csv_invalid_path() {
        assert!(Map::from_csv("nonexistent_map.csv").is_err());
    }
}
