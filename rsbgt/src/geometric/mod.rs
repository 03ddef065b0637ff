pub mod area_of_interest;
pub mod bgt;
pub mod bgt_layer;
pub mod clip;
pub mod linearize;
