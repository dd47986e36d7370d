use serde::{Deserialize, Serialize};

pub const HAND_LANDMARK_COUNT: usize = 21;

/// One normalized hand point. (0,0) is top-left, (1,1) bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandError {
    WrongLandmarkCount(usize),
    NonFiniteCoordinate(usize),
}

impl std::fmt::Display for HandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandError::WrongLandmarkCount(n) => {
                write!(f, "hand must have {HAND_LANDMARK_COUNT} landmarks, got {n}")
            }
            HandError::NonFiniteCoordinate(i) => {
                write!(f, "landmark {i} has a non-finite coordinate")
            }
        }
    }
}

impl std::error::Error for HandError {}

/// A detected hand: exactly 21 landmarks in anatomical index order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Landmark>", into = "Vec<Landmark>")]
pub struct Hand {
    points: Vec<Landmark>,
}

impl TryFrom<Vec<Landmark>> for Hand {
    type Error = HandError;

    fn try_from(points: Vec<Landmark>) -> Result<Self, Self::Error> {
        Hand::new(points)
    }
}

impl From<Hand> for Vec<Landmark> {
    fn from(h: Hand) -> Self {
        h.points
    }
}

/// Wire shape sent to the classifier: `{"i":0,"x":0.123,"y":0.456}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndexedPoint {
    pub i: usize,
    pub x: f64,
    pub y: f64,
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

impl Hand {
    pub fn new(points: Vec<Landmark>) -> Result<Self, HandError> {
        if points.len() != HAND_LANDMARK_COUNT {
            return Err(HandError::WrongLandmarkCount(points.len()));
        }
        if let Some(i) = points
            .iter()
            .position(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(HandError::NonFiniteCoordinate(i));
        }
        Ok(Self { points })
    }

    pub fn indexed_points(&self) -> Vec<IndexedPoint> {
        self.points
            .iter()
            .enumerate()
            .map(|(i, p)| IndexedPoint {
                i,
                x: round3(p.x),
                y: round3(p.y),
            })
            .collect()
    }
}

/// Output of one detector pass. The detector's own field name is accepted too.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandFrame {
    #[serde(default, alias = "multiHandLandmarks")]
    pub hands: Vec<Hand>,
}

impl HandFrame {
    pub fn new(hands: Vec<Hand>) -> Self {
        Self { hands }
    }

    /// Only the first detected hand is ever classified.
    pub fn first_hand(&self) -> Option<&Hand> {
        self.hands.first()
    }
}
