mod blocks;
mod constants;
mod jit;
mod linker_properties;
mod test_helpers;
mod unwinding;
