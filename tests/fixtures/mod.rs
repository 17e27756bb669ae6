pub mod jackets;
