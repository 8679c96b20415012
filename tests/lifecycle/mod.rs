mod placement_test;
mod restart_test;
mod terminate_test;
