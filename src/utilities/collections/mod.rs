pub mod index_set;
pub mod quick_dictionary;
