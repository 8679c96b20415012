mod local_file_test;
