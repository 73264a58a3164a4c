mod infrastructure_tests;
