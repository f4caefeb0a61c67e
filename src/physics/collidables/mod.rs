pub mod collidable_reference;
