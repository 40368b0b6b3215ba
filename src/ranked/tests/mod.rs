pub mod helpers;
mod tests_avl;
