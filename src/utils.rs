//! Small numeric helpers shared by the tracker and the replay binary

pub mod safe_cast;
