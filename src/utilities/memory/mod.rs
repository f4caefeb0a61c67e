pub mod buffer_pool;
pub mod id_pool;
pub mod worker_buffer_pools;
