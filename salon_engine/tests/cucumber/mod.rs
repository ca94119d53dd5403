mod salon_world;
mod setups;
mod steps;

pub use salon_world::SalonWorld;
