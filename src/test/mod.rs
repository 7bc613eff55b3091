#![cfg(test)]

pub(crate) mod reliability;
