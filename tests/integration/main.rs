mod shared;
mod worker;
