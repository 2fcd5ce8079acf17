//! End-to-end scenarios spanning the compiler and the artifact crate.

#[cfg(test)]
mod end_to_end;
