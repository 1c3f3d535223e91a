mod ipc;
mod keys;
