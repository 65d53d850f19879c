pub mod docsafe;
