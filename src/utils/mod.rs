pub mod checkpointing;
